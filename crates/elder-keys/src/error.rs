use elder_core::{KeyId, KeyStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key expired: {0}")]
    KeyExpired(KeyId),

    #[error("Key revoked: {0}")]
    KeyRevoked(KeyId),

    #[error("Key {key_id} is {status}, not active")]
    KeyNotActive { key_id: KeyId, status: KeyStatus },

    #[error("Owner {0} already has an active key")]
    ActiveKeyExists(String),

    #[error("Invalid status transition for {key_id}: {from} -> {to}")]
    InvalidTransition {
        key_id: KeyId,
        from: KeyStatus,
        to: KeyStatus,
    },

    #[error("Key already revoked: {0}")]
    AlreadyRevoked(KeyId),

    #[error("Unauthorized revocation: {0}")]
    UnauthorizedRevocation(String),

    #[error("Key lifetime must be positive")]
    InvalidLifetime,

    #[error("Invalid threshold: m={m}, n={n}")]
    InvalidThreshold { m: usize, n: usize },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Core error: {0}")]
    Core(#[from] elder_core::CoreError),
}
