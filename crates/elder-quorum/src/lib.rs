//! Elder Quorum - Signing, signature collection, and quorum verification
//!
//! This crate provides the per-Elder signer with its audit trail, the
//! acceptance predicate shared by collection and verification, the
//! quorum coordinator that gathers signatures within a bounded window, and
//! the pure verifier any node can run against a pinned registry snapshot.

pub mod acceptance;
pub mod audit;
pub mod coordinator;
pub mod error;
pub mod signer;
pub mod verifier;

pub use acceptance::{check_signature, tally, Tally};
pub use audit::{AuditEvent, AuditSink, JsonlAuditLog, MemoryAuditLog};
pub use coordinator::{CoordinatorConfig, QuorumCoordinator, QuorumStatus, SessionId, SubmitOutcome};
pub use error::QuorumError;
pub use signer::Signer;
pub use verifier::{verify_quorum, Verification};
