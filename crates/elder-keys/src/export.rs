use elder_core::{
    scheme_for, serialize, AuthorizationSignature, ElderId, KeyId, RevocationEntry,
    SignatureAlgorithm, SigningIdentity,
};
use serde::{Deserialize, Serialize};

use crate::authority::elder_signers;
use crate::error::KeyError;
use crate::snapshot::RegistrySnapshot;

const LIST_DOMAIN: &[u8] = b"EQRL1";

/// Public view of one revocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationListItem {
    pub key_id: KeyId,
    pub reason: String,
    pub revoked_by: String,
    pub revoked_at: u64,
}

impl From<&RevocationEntry> for RevocationListItem {
    fn from(entry: &RevocationEntry) -> Self {
        RevocationListItem {
            key_id: entry.key_id,
            reason: entry.reason.clone(),
            revoked_by: entry.revoked_by.clone(),
            revoked_at: entry.revoked_at,
        }
    }
}

#[derive(Serialize)]
struct SignedContent<'a> {
    issuer: &'a str,
    issued_at: u64,
    entries: &'a [RevocationListItem],
}

/// Revocation list for external audit, signed by the revocation authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRevocationList {
    pub issuer: String,
    pub algorithm: SignatureAlgorithm,
    pub issuer_public_key: Vec<u8>,
    pub issued_at: u64,
    pub entries: Vec<RevocationListItem>,
    pub signature: Vec<u8>,
    /// Elder signatures over the same content, for an elder-quorum authority
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endorsements: Vec<AuthorizationSignature>,
}

impl SignedRevocationList {
    pub fn sign(
        identity: &SigningIdentity,
        issuer: impl Into<String>,
        entries: &[RevocationEntry],
        issued_at: u64,
    ) -> Result<Self, KeyError> {
        let issuer = issuer.into();
        let entries: Vec<RevocationListItem> = entries.iter().map(Into::into).collect();
        let payload = signed_bytes(&issuer, issued_at, &entries)?;

        Ok(SignedRevocationList {
            issuer,
            algorithm: identity.algorithm(),
            issuer_public_key: identity.public_key().to_vec(),
            issued_at,
            entries,
            signature: identity.sign(&payload)?,
            endorsements: Vec::new(),
        })
    }

    /// Bytes signed by the issuer and by every endorsing Elder
    pub fn payload(&self) -> Result<Vec<u8>, KeyError> {
        signed_bytes(&self.issuer, self.issued_at, &self.entries)
    }

    pub fn endorse(&mut self, elder_id: &ElderId, key_id: KeyId, signature: Vec<u8>) {
        self.endorsements.push(AuthorizationSignature {
            signer: elder_id.to_string(),
            key_id: Some(key_id),
            signature,
        });
    }

    /// Check that a threshold of distinct Elders in `snapshot` endorsed the
    /// list with keys valid at `issued_at`. Returns the endorsing Elders.
    pub fn verify_endorsed(&self, snapshot: &RegistrySnapshot) -> Result<Vec<ElderId>, KeyError> {
        let payload = self.payload()?;
        scheme_for(self.algorithm).verify(&self.issuer_public_key, &payload, &self.signature)?;

        let signers = elder_signers(snapshot, &payload, self.issued_at, &self.endorsements);
        if signers.len() < snapshot.threshold {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "revocation list endorsed by {} of {} required elders",
                signers.len(),
                snapshot.threshold
            )));
        }
        Ok(signers.into_iter().collect())
    }

    /// Check the list was signed by `expected_public_key`
    pub fn verify(&self, expected_public_key: &[u8]) -> Result<(), KeyError> {
        if self.issuer_public_key != expected_public_key {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "revocation list not issued by the expected key ({})",
                self.issuer
            )));
        }
        let payload = self.payload()?;
        scheme_for(self.algorithm).verify(&self.issuer_public_key, &payload, &self.signature)?;
        Ok(())
    }

    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.entries.iter().any(|item| &item.key_id == key_id)
    }

    pub fn to_json(&self) -> Result<String, KeyError> {
        Ok(serialize::to_json_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, KeyError> {
        Ok(serialize::from_json(json)?)
    }
}

fn signed_bytes(
    issuer: &str,
    issued_at: u64,
    entries: &[RevocationListItem],
) -> Result<Vec<u8>, KeyError> {
    let json = serialize::to_json(&SignedContent {
        issuer,
        issued_at,
        entries,
    })?;
    let mut out = LIST_DOMAIN.to_vec();
    out.extend_from_slice(json.as_bytes());
    Ok(out)
}
