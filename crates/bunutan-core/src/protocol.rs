// Wire protocol: inbound intents and outbound events, JSON-tagged by "type".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::Snapshot;

/// A request sent by a connected observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    /// Ask for the current snapshot (sent once on connect).
    Connect,
    /// Ask for the remaining items only.
    QueryPool,
    /// Draw an item for `identity`.
    Draw {
        #[serde(default, alias = "username")]
        identity: String,
    },
    /// Restore the pool; `identity` must be the administrator.
    Reset {
        #[serde(default, alias = "username")]
        identity: String,
    },
}

impl Intent {
    /// Parse a raw text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// An event pushed to one or more observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Snapshot {
        assignments: BTreeMap<String, String>,
        items: Vec<String>,
    },
    Items {
        items: Vec<String>,
    },
    Notice {
        message: String,
    },
}

impl Outbound {
    pub fn notice(message: impl Into<String>) -> Self {
        Outbound::Notice {
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Snapshot> for Outbound {
    fn from(snapshot: Snapshot) -> Self {
        Outbound::Snapshot {
            assignments: snapshot.assignments,
            items: snapshot.items,
        }
    }
}
