use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use elder_core::{
    revocation_payload, scheme_for, AuthorizationSignature, ElderId, KeyId,
    RevocationAuthorization, SignatureAlgorithm, SigningIdentity,
};
use tracing::debug;

use crate::error::KeyError;
use crate::snapshot::RegistrySnapshot;

/// Policy deciding whether a revocation request is authorized
pub trait RevocationAuthority: Send + Sync {
    /// Recorded as `revoked_by` on accepted entries
    fn authority_id(&self) -> String;

    fn authorize(
        &self,
        key_id: &KeyId,
        reason: &str,
        authorization: &RevocationAuthorization,
    ) -> Result<(), KeyError>;
}

/// A single security authority whose key must sign every revocation
#[derive(Debug, Clone)]
pub struct DesignatedAuthority {
    name: String,
    algorithm: SignatureAlgorithm,
    public_key: Vec<u8>,
}

impl DesignatedAuthority {
    pub fn new(name: impl Into<String>, identity: &SigningIdentity) -> Self {
        Self::from_public_key(name, identity.algorithm(), identity.public_key().to_vec())
    }

    pub fn from_public_key(
        name: impl Into<String>,
        algorithm: SignatureAlgorithm,
        public_key: Vec<u8>,
    ) -> Self {
        DesignatedAuthority {
            name: name.into(),
            algorithm,
            public_key,
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl RevocationAuthority for DesignatedAuthority {
    fn authority_id(&self) -> String {
        self.name.clone()
    }

    fn authorize(
        &self,
        key_id: &KeyId,
        reason: &str,
        authorization: &RevocationAuthorization,
    ) -> Result<(), KeyError> {
        let payload = revocation_payload(key_id, reason, authorization.issued_at);
        let scheme = scheme_for(self.algorithm);

        let signed = authorization
            .signatures
            .iter()
            .filter(|sig| sig.signer == self.name)
            .any(|sig| {
                scheme
                    .verify(&self.public_key, &payload, &sig.signature)
                    .is_ok()
            });
        if !signed {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "no valid signature from {}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Distinct Elders whose signature over `payload` verifies with a key that
/// was valid for them at `at`
pub(crate) fn elder_signers(
    snapshot: &RegistrySnapshot,
    payload: &[u8],
    at: u64,
    signatures: &[AuthorizationSignature],
) -> BTreeSet<ElderId> {
    let mut signers = BTreeSet::new();
    for sig in signatures {
        let elder_id = ElderId::new(sig.signer.clone());
        let Some(signer_key) = sig.key_id else {
            debug!("Co-signature from {} names no key", elder_id);
            continue;
        };
        let Some(key) = snapshot.keys.get(&signer_key) else {
            debug!("Co-signature from {} uses unknown key", elder_id);
            continue;
        };
        if let Err(rejection) = snapshot.key_valid_for(&elder_id, &signer_key, key.algorithm, at) {
            debug!("Co-signature from {} dropped: {}", elder_id, rejection);
            continue;
        }
        if scheme_for(key.algorithm)
            .verify(&key.public_key, payload, &sig.signature)
            .is_err()
        {
            debug!("Co-signature from {} failed to verify", elder_id);
            continue;
        }
        signers.insert(elder_id);
    }
    signers
}

/// Revocations must be co-signed by a threshold of distinct enrolled Elders,
/// each using a key that was valid at the authorization's `issued_at`.
pub struct ElderQuorumAuthority {
    snapshot: RwLock<Option<Arc<RegistrySnapshot>>>,
}

impl ElderQuorumAuthority {
    pub const AUTHORITY_ID: &'static str = "elder-quorum";

    pub fn new(snapshot: RegistrySnapshot) -> Self {
        ElderQuorumAuthority {
            snapshot: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Authority with no snapshot yet; rejects everything until one is
    /// installed with [`ElderQuorumAuthority::replace_snapshot`]
    pub fn pending() -> Self {
        ElderQuorumAuthority {
            snapshot: RwLock::new(None),
        }
    }

    /// Swap in a newer snapshot (e.g. after the Elder set changed)
    pub fn replace_snapshot(&self, snapshot: RegistrySnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RevocationAuthority for ElderQuorumAuthority {
    fn authority_id(&self) -> String {
        Self::AUTHORITY_ID.to_string()
    }

    fn authorize(
        &self,
        key_id: &KeyId,
        reason: &str,
        authorization: &RevocationAuthorization,
    ) -> Result<(), KeyError> {
        let snapshot = self.snapshot().ok_or_else(|| {
            KeyError::UnauthorizedRevocation("no elder registry snapshot installed".to_string())
        })?;
        let at = authorization.issued_at;
        let payload = revocation_payload(key_id, reason, at);
        let signers = elder_signers(&snapshot, &payload, at, &authorization.signatures);

        if signers.len() < snapshot.threshold {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "{} of {} required elder signatures",
                signers.len(),
                snapshot.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::snapshot::{ElderSnapshot, KeySnapshot};

    fn designated() -> (SigningIdentity, DesignatedAuthority) {
        let identity = SigningIdentity::generate(SignatureAlgorithm::Ed25519);
        let authority = DesignatedAuthority::new("security", &identity);
        (identity, authority)
    }

    #[test]
    fn test_designated_accepts_own_signature() {
        let (identity, authority) = designated();
        let key_id = KeyId([3u8; 16]);
        let auth =
            RevocationAuthorization::designated("security", &identity, &key_id, "lost", 10).unwrap();
        assert!(authority.authorize(&key_id, "lost", &auth).is_ok());
        assert_eq!(authority.authority_id(), "security");
    }

    #[test]
    fn test_designated_rejects_other_reason_or_signer() {
        let (identity, authority) = designated();
        let key_id = KeyId([3u8; 16]);
        let auth =
            RevocationAuthorization::designated("security", &identity, &key_id, "lost", 10).unwrap();
        assert!(matches!(
            authority.authorize(&key_id, "stolen", &auth),
            Err(KeyError::UnauthorizedRevocation(_))
        ));

        let impostor = SigningIdentity::generate(SignatureAlgorithm::Ed25519);
        let forged =
            RevocationAuthorization::designated("security", &impostor, &key_id, "lost", 10).unwrap();
        assert!(authority.authorize(&key_id, "lost", &forged).is_err());
        assert!(authority
            .authorize(&key_id, "lost", &RevocationAuthorization::new(10))
            .is_err());
    }

    fn quorum_snapshot(identities: &[SigningIdentity], threshold: usize) -> RegistrySnapshot {
        let mut elders = BTreeMap::new();
        let mut keys = BTreeMap::new();
        for (i, identity) in identities.iter().enumerate() {
            let elder_id = ElderId::new(format!("elder_{}", i));
            keys.insert(
                identity.key_id(),
                KeySnapshot {
                    owner_id: elder_id.clone(),
                    algorithm: identity.algorithm(),
                    public_key: identity.public_key().to_vec(),
                    created_at: 0,
                    expires_at: 1_000,
                    rotated_at: None,
                },
            );
            elders.insert(
                elder_id.clone(),
                ElderSnapshot {
                    elder_id,
                    enrolled: true,
                    enrolled_at_height: 0,
                    active_key_id: Some(identity.key_id()),
                    key_ids: vec![identity.key_id()],
                },
            );
        }
        RegistrySnapshot {
            height: 0,
            threshold,
            total_enrolled: identities.len(),
            elders,
            keys,
            revocations: BTreeMap::new(),
        }
    }

    fn cosign(
        auth: &mut RevocationAuthorization,
        index: usize,
        identity: &SigningIdentity,
        target: &KeyId,
        reason: &str,
    ) {
        let sig = identity
            .sign(&revocation_payload(target, reason, auth.issued_at))
            .unwrap();
        auth.push(format!("elder_{}", index), Some(identity.key_id()), sig);
    }

    #[test]
    fn test_elder_quorum_threshold() {
        let identities: Vec<_> = (0..5)
            .map(|_| SigningIdentity::generate(SignatureAlgorithm::Ed25519))
            .collect();
        let authority = ElderQuorumAuthority::new(quorum_snapshot(&identities, 3));
        let target = identities[4].key_id();

        let mut auth = RevocationAuthorization::new(100);
        cosign(&mut auth, 0, &identities[0], &target, "compromised");
        cosign(&mut auth, 1, &identities[1], &target, "compromised");
        // Same Elder twice does not count double
        cosign(&mut auth, 1, &identities[1], &target, "compromised");
        assert!(authority.authorize(&target, "compromised", &auth).is_err());

        cosign(&mut auth, 2, &identities[2], &target, "compromised");
        assert!(authority.authorize(&target, "compromised", &auth).is_ok());
    }

    #[test]
    fn test_elder_quorum_uses_issue_time() {
        let identities: Vec<_> = (0..3)
            .map(|_| SigningIdentity::generate(SignatureAlgorithm::Ed25519))
            .collect();
        let authority = ElderQuorumAuthority::new(quorum_snapshot(&identities, 2));
        let target = KeyId([9u8; 16]);

        // Keys expire at 1_000 in the snapshot
        let mut late = RevocationAuthorization::new(1_000);
        cosign(&mut late, 0, &identities[0], &target, "retired");
        cosign(&mut late, 1, &identities[1], &target, "retired");
        assert!(authority.authorize(&target, "retired", &late).is_err());

        let mut auth = RevocationAuthorization::new(999);
        cosign(&mut auth, 0, &identities[0], &target, "retired");
        cosign(&mut auth, 1, &identities[1], &target, "retired");
        assert!(authority.authorize(&target, "retired", &auth).is_ok());

        authority.replace_snapshot(quorum_snapshot(&identities, 3));
        assert!(authority.authorize(&target, "retired", &auth).is_err());
        assert_eq!(authority.snapshot().unwrap().threshold, 3);
    }

    #[test]
    fn test_issue_time_cannot_be_rewritten() {
        let identities: Vec<_> = (0..3)
            .map(|_| SigningIdentity::generate(SignatureAlgorithm::Ed25519))
            .collect();
        let mut snapshot = quorum_snapshot(&identities, 2);
        snapshot.revocations.insert(identities[0].key_id(), 500);
        snapshot.revocations.insert(identities[1].key_id(), 500);
        let authority = ElderQuorumAuthority::new(snapshot);
        let target = identities[2].key_id();

        // Revoked keys co-sign after their revocation
        let mut auth = RevocationAuthorization::new(900);
        cosign(&mut auth, 0, &identities[0], &target, "takeover");
        cosign(&mut auth, 1, &identities[1], &target, "takeover");
        assert!(authority.authorize(&target, "takeover", &auth).is_err());

        // Moving the issue time back breaks every signature
        auth.issued_at = 100;
        assert!(authority.authorize(&target, "takeover", &auth).is_err());

        let (identity, designated) = designated();
        let mut signed =
            RevocationAuthorization::designated("security", &identity, &target, "lost", 10)
                .unwrap();
        signed.issued_at = 5;
        assert!(designated.authorize(&target, "lost", &signed).is_err());
    }

    #[test]
    fn test_pending_authority_rejects() {
        let authority = ElderQuorumAuthority::pending();
        let result = authority.authorize(&KeyId([1u8; 16]), "x", &RevocationAuthorization::new(0));
        assert!(matches!(result, Err(KeyError::UnauthorizedRevocation(_))));
        assert_eq!(authority.authority_id(), ElderQuorumAuthority::AUTHORITY_ID);
    }
}
