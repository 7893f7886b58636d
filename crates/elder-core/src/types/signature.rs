use serde::{Deserialize, Serialize};

use crate::crypto::{scheme_for, Hash, KeyId, SignatureAlgorithm};
use crate::error::CoreError;
use crate::types::elder::ElderId;

const SIGNATURE_DOMAIN: &[u8] = b"EQSIG1";

/// Bytes an Elder signs for a header.
///
/// `signed_at`, the signer and the key are bound into the payload, so a
/// relayer can neither re-date a signature across a revocation boundary nor
/// attribute it to another Elder.
pub fn signing_payload(
    header_hash: &Hash,
    elder_id: &ElderId,
    key_id: &KeyId,
    signed_at: u64,
) -> Vec<u8> {
    let elder = elder_id.as_str().as_bytes();
    let mut out = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 32 + 4 + elder.len() + 16 + 8);
    out.extend_from_slice(SIGNATURE_DOMAIN);
    out.extend_from_slice(header_hash.as_bytes());
    out.extend_from_slice(&(elder.len() as u32).to_be_bytes());
    out.extend_from_slice(elder);
    out.extend_from_slice(key_id.as_bytes());
    out.extend_from_slice(&signed_at.to_be_bytes());
    out
}

/// One Elder's signature over one canonical header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualSignature {
    pub elder_id: ElderId,
    pub key_id: KeyId,
    /// Blake3 of the canonical header bytes that were signed
    pub header_hash: Hash,
    pub signature_bytes: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
    /// Unix ms
    pub signed_at: u64,
}

impl IndividualSignature {
    pub fn payload(&self) -> Vec<u8> {
        signing_payload(&self.header_hash, &self.elder_id, &self.key_id, self.signed_at)
    }

    /// Cryptographic check only; key validity is the caller's concern
    pub fn verify_with(&self, public_key: &[u8]) -> Result<(), CoreError> {
        scheme_for(self.algorithm).verify(public_key, &self.payload(), &self.signature_bytes)
    }
}

/// Quorum-level attestation assembled from distinct Elder signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSignature {
    /// Height the registry snapshot was pinned at
    pub height: u64,
    /// Canonical header bytes this attests to
    pub header: Vec<u8>,
    pub header_hash: Hash,
    /// Counted signatures, one per Elder, in acceptance order
    pub signatures: Vec<IndividualSignature>,
    pub threshold: usize,
    pub total_enrolled: usize,
    pub is_valid: bool,
}

impl QuorumSignature {
    pub fn signers(&self) -> Vec<ElderId> {
        self.signatures.iter().map(|s| s.elder_id.clone()).collect()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}
