use serde::{Deserialize, Serialize};

use crate::crypto::{KeyId, SigningIdentity};
use crate::error::CoreError;

const REVOCATION_DOMAIN: &[u8] = b"EQREV1";

/// Bytes an authority signs to authorize revoking `key_id`.
///
/// `issued_at` is bound into the payload so an authorization cannot be
/// re-dated after it was signed.
pub fn revocation_payload(key_id: &KeyId, reason: &str, issued_at: u64) -> Vec<u8> {
    let reason = reason.as_bytes();
    let mut out = Vec::with_capacity(REVOCATION_DOMAIN.len() + 16 + 8 + 4 + reason.len());
    out.extend_from_slice(REVOCATION_DOMAIN);
    out.extend_from_slice(key_id.as_bytes());
    out.extend_from_slice(&issued_at.to_be_bytes());
    out.extend_from_slice(&(reason.len() as u32).to_be_bytes());
    out.extend_from_slice(reason);
    out
}

/// One signature inside a revocation authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSignature {
    /// Authority name or Elder id
    pub signer: String,
    /// Key the signer used, when it is an Elder key
    pub key_id: Option<KeyId>,
    pub signature: Vec<u8>,
}

/// Proof that a revocation was authorized
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationAuthorization {
    /// Unix ms at which the authorization was produced
    pub issued_at: u64,
    pub signatures: Vec<AuthorizationSignature>,
}

impl RevocationAuthorization {
    pub fn new(issued_at: u64) -> Self {
        RevocationAuthorization {
            issued_at,
            signatures: Vec::new(),
        }
    }

    /// Authorization signed by a single designated authority
    pub fn designated(
        authority: &str,
        identity: &SigningIdentity,
        key_id: &KeyId,
        reason: &str,
        issued_at: u64,
    ) -> Result<Self, CoreError> {
        let mut auth = Self::new(issued_at);
        auth.signatures.push(AuthorizationSignature {
            signer: authority.to_string(),
            key_id: None,
            signature: identity.sign(&revocation_payload(key_id, reason, issued_at))?,
        });
        Ok(auth)
    }

    /// Append a signature produced elsewhere (e.g. by an Elder's signer)
    pub fn push(&mut self, signer: impl Into<String>, key_id: Option<KeyId>, signature: Vec<u8>) {
        self.signatures.push(AuthorizationSignature {
            signer: signer.into(),
            key_id,
            signature,
        });
    }
}

/// An append-only revocation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    /// Position in the registry, starting at 0
    pub sequence: u64,
    pub key_id: KeyId,
    pub reason: String,
    /// Authority that approved the revocation
    pub revoked_by: String,
    /// Unix ms
    pub revoked_at: u64,
    pub authorization: RevocationAuthorization,
}

impl RevocationEntry {
    /// Non-retroactive rule: revoked at `t` iff `revoked_at <= t`
    pub fn is_effective_at(&self, t: u64) -> bool {
        self.revoked_at <= t
    }
}
