//! Elder Core - Core types, signature schemes, and canonical encodings
//!
//! This crate provides the data model shared by the Elder quorum key
//! lifecycle and threshold-signature crates: key identifiers, pluggable
//! signature schemes, the canonical block-header byte layout, and the
//! signature/revocation records exchanged between Elders.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{
    hash_blake3, hash_domain, scheme_for, Ed25519Blake3Scheme, Ed25519Scheme, Hash, KeyId,
    SignatureAlgorithm, SignatureScheme, SigningIdentity,
};
pub use error::CoreError;
pub use types::*;
