use elder_keys::KeyRejection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuorumError {
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),

    #[error("Quorum not reached: have {have}, need {need}")]
    QuorumNotReached { have: usize, need: usize },

    #[error("Elder {0} already counted for this header")]
    DuplicateSigner(String),

    #[error("Signature is over a different header")]
    StaleHeader,

    #[error("Snapshot height mismatch: header at {header}, snapshot at {snapshot}")]
    SnapshotHeightMismatch { header: u64, snapshot: u64 },

    #[error("Key rejected: {0}")]
    KeyRejected(#[from] KeyRejection),

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Session closed: {0}")]
    SessionClosed(u64),

    #[error("Audit error: {0}")]
    Audit(String),

    #[error("Key error: {0}")]
    Key(#[from] elder_keys::KeyError),

    #[error("Core error: {0}")]
    Core(#[from] elder_core::CoreError),
}
