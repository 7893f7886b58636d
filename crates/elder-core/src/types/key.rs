use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyId, SignatureAlgorithm};
use crate::types::elder::ElderId;

/// Lifecycle status of a key record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Rotated,
    Expired,
    Revoked,
}

impl KeyStatus {
    /// Transitions only move forward; `Revoked` is terminal and nothing
    /// returns to `Active`.
    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        use KeyStatus::*;
        matches!(
            (self, next),
            (Active, Rotated)
                | (Active, Expired)
                | (Active, Revoked)
                | (Rotated, Expired)
                | (Rotated, Revoked)
                | (Expired, Revoked)
        )
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotated => "rotated",
            KeyStatus::Expired => "expired",
            KeyStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// AEAD-sealed private key material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBlob({} bytes)", self.ciphertext.len())
    }
}

/// A key owned by an Elder. Records are never deleted, so historical
/// signatures stay verifiable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: KeyId,
    pub algorithm: SignatureAlgorithm,
    pub public_key: Vec<u8>,
    pub encrypted_private_key: EncryptedBlob,
    pub owner_id: ElderId,
    /// Unix ms
    pub created_at: u64,
    /// Unix ms, exclusive
    pub expires_at: u64,
    pub rotated_at: Option<u64>,
    pub revoked_at: Option<u64>,
    pub status: KeyStatus,
}

impl KeyRecord {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the record was the owner's signing key at time `t`, ignoring
    /// the revocation registry.
    pub fn was_active_at(&self, t: u64) -> bool {
        t >= self.created_at
            && t < self.expires_at
            && self.rotated_at.map_or(true, |rotated| t < rotated)
            && self.revoked_at.map_or(true, |revoked| t < revoked)
    }
}
