pub mod hash;
pub mod keys;
pub mod scheme;

pub use hash::{hash_blake3, hash_domain, Hash};
pub use keys::{KeyId, SigningIdentity};
pub use scheme::{scheme_for, Ed25519Blake3Scheme, Ed25519Scheme, SignatureAlgorithm, SignatureScheme};
