//! Elder Keys - Key storage, lifecycle, and revocation
//!
//! This crate provides the encrypted key store, the key lifecycle manager
//! (generate / rotate / expire), the append-only revocation registry with
//! pluggable authorization policies, and height-pinned registry snapshots.

pub mod authority;
pub mod error;
pub mod export;
pub mod keystore;
pub mod lifecycle;
pub mod registry;
pub mod revocation;
pub mod snapshot;
pub mod storage;

pub use authority::{DesignatedAuthority, ElderQuorumAuthority, RevocationAuthority};
pub use error::KeyError;
pub use export::{RevocationListItem, SignedRevocationList};
pub use keystore::{KeyIndexEntry, KeyStore, MasterKey};
pub use lifecycle::KeyLifecycleManager;
pub use registry::{ElderEnrollment, ElderRegistry, ThresholdPolicy};
pub use revocation::{RevocationRegistry, DEFAULT_AUTHORIZATION_WINDOW_MS};
pub use snapshot::{ElderSnapshot, KeyRejection, KeySnapshot, RegistrySnapshot};
pub use storage::{FileStorage, MemoryStorage, Storage};
