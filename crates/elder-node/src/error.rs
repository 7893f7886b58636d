use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown elder: {0}")]
    UnknownElder(String),

    #[error("No snapshot pinned at height {0}")]
    NoSnapshot(u64),

    #[error("No collection round for header {0}")]
    NoRound(String),

    #[error("Revocation authority is not an elder quorum")]
    NotElderQuorum,

    #[error("Snapshot store error: {0}")]
    SnapshotStore(String),

    #[error("Key error: {0}")]
    Key(#[from] elder_keys::KeyError),

    #[error("Quorum error: {0}")]
    Quorum(#[from] elder_quorum::QuorumError),

    #[error("Core error: {0}")]
    Core(#[from] elder_core::CoreError),
}
