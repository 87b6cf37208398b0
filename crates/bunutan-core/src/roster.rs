// Roster: the fixed allow-list of participants and the administrator.

/// Case-fold an identity for comparison. Two identities name the same
/// participant iff their folded forms are equal.
pub fn fold(identity: &str) -> String {
    identity.to_lowercase()
}

/// A participant identity as supplied by a client, paired with its folded
/// lookup key.
///
/// `display` keeps the casing the participant used; `key` is what every
/// comparison goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub display: String,
    pub key: String,
}

impl Participant {
    /// Build a participant from a raw identity string. Surrounding whitespace
    /// is trimmed; returns `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Participant {
            display: trimmed.to_string(),
            key: fold(trimmed),
        })
    }
}

/// The static set of identities permitted to draw, one of which is the
/// administrator allowed to reset.
#[derive(Debug, Clone)]
pub struct Roster {
    /// Folded administrator identity.
    admin: String,
    /// Folded forms of `admin` followed by `participants`.
    keys: Vec<String>,
}

impl Roster {
    /// Create a roster. The administrator is always authorized to draw, so it
    /// does not need to be repeated in `participants`.
    pub fn new(admin: impl Into<String>, participants: Vec<String>) -> Self {
        let admin = fold(admin.into().trim());
        let keys = std::iter::once(admin.clone())
            .chain(participants.iter().map(|name| fold(name.trim())))
            .collect();
        Roster { admin, keys }
    }

    /// Total number of identities on the roster, administrator included.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True iff the case-folded identity matches any roster entry.
    pub fn is_authorized_to_draw(&self, identity: &str) -> bool {
        let key = fold(identity.trim());
        self.keys.iter().any(|k| *k == key)
    }

    /// True iff the case-folded identity matches the administrator entry.
    pub fn is_administrator(&self, identity: &str) -> bool {
        fold(identity.trim()) == self.admin
    }
}
