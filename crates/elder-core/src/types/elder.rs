use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::KeyId;

/// Identity of an Elder, assigned by governance
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElderId(pub String);

impl ElderId {
    pub fn new(id: impl Into<String>) -> Self {
        ElderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElderId({})", self.0)
    }
}

impl fmt::Display for ElderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElderId {
    fn from(s: &str) -> Self {
        ElderId(s.to_string())
    }
}

/// An Elder together with its key history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElderIdentity {
    pub elder_id: ElderId,
    /// Currently active key, if any
    pub active_key_id: Option<KeyId>,
    /// Every key the Elder has held, oldest first
    pub key_ids: Vec<KeyId>,
    /// Enrollment flag, owned by governance
    pub enrolled: bool,
    /// Height at which the Elder was enrolled
    pub enrolled_at_height: u64,
}
