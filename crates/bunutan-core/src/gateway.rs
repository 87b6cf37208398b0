// Session gateway: validates a connection's intent and turns it into at most
// one store mutation plus exactly one response (private reply or broadcast).

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::draw::DrawEngine;
use crate::protocol::{Intent, Outbound};
use crate::roster::{Participant, Roster};
use crate::store::{DrawError, Store};

/// A rejected request. `Display` is the notice text sent to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("You must supply a name.")]
    EmptyIdentity,

    #[error("{0} is not allowed to pick.")]
    UnauthorizedIdentity(String),

    #[error("{participant} already has: {item}")]
    AlreadyAssigned { participant: String, item: String },

    #[error("No items remaining!")]
    PoolEmpty,

    #[error("{0} is not allowed to reset.")]
    NotAdministrator(String),

    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl From<DrawError> for RequestError {
    fn from(err: DrawError) -> Self {
        match err {
            DrawError::AlreadyAssigned { participant, item } => {
                RequestError::AlreadyAssigned { participant, item }
            }
            DrawError::PoolEmpty => RequestError::PoolEmpty,
        }
    }
}

/// Where a response goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Only to the connection that sent the request.
    Reply(Outbound),
    /// To every connected observer.
    Broadcast(Outbound),
}

/// Shared request handler. Cheap to clone; every clone works on the same
/// store.
#[derive(Debug, Clone)]
pub struct Gateway {
    store: Arc<Store>,
    roster: Arc<Roster>,
    engine: DrawEngine,
}

impl Gateway {
    pub fn new(store: Arc<Store>, roster: Arc<Roster>, engine: DrawEngine) -> Self {
        Gateway {
            store,
            roster,
            engine,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Handle a raw text frame. Frames that do not parse as an [`Intent`]
    /// get a private notice and change nothing.
    pub fn handle_text(&self, text: &str) -> Response {
        match Intent::from_json(text) {
            Ok(intent) => self.handle(intent),
            Err(e) => {
                warn!("Rejected malformed request: {e}");
                reject(RequestError::Malformed(e.to_string()))
            }
        }
    }

    /// Handle a parsed intent.
    pub fn handle(&self, intent: Intent) -> Response {
        match intent {
            Intent::Connect => Response::Reply(self.store.snapshot().into()),
            Intent::QueryPool => Response::Reply(Outbound::Items {
                items: self.store.remaining(),
            }),
            Intent::Draw { identity } => match self.draw(&identity) {
                Ok(()) => Response::Broadcast(self.store.snapshot().into()),
                Err(e) => reject(e),
            },
            Intent::Reset { identity } => match self.reset(&identity) {
                Ok(()) => Response::Broadcast(self.store.snapshot().into()),
                Err(e) => reject(e),
            },
        }
    }

    fn draw(&self, identity: &str) -> Result<(), RequestError> {
        let participant = Participant::parse(identity).ok_or(RequestError::EmptyIdentity)?;
        if !self.roster.is_authorized_to_draw(&participant.display) {
            return Err(RequestError::UnauthorizedIdentity(participant.display));
        }
        let item = self
            .store
            .try_draw(&participant, |pool| self.engine.select(pool).unwrap_or(0))?;
        debug!(participant = %participant.display, item = %item, "Draw committed");
        Ok(())
    }

    fn reset(&self, identity: &str) -> Result<(), RequestError> {
        let participant = Participant::parse(identity).ok_or(RequestError::EmptyIdentity)?;
        if !self.roster.is_administrator(&participant.display) {
            return Err(RequestError::NotAdministrator(participant.display));
        }
        self.store.reset();
        info!(by = %participant.display, "Reset requested");
        Ok(())
    }
}

fn reject(err: RequestError) -> Response {
    debug!("Request rejected: {err}");
    Response::Reply(Outbound::notice(err.to_string()))
}
