//! Elder Node - Configuration and service facade for the Elder quorum
//!
//! This crate wires the key store, revocation registry, signer, coordinator
//! and verifier together behind [`ElderService`], and ships the `elder`
//! command-line tool.

pub mod config;
pub mod error;
pub mod service;

pub use config::{generate_sample_config, AuthorityConfig, NodeConfig};
pub use error::ServiceError;
pub use service::{Backends, Clock, ElderService, SystemClock};
