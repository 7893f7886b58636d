use std::sync::Arc;

use elder_core::{
    hash_blake3, revocation_payload, scheme_for, signing_payload, CanonicalHeader, ElderId,
    IndividualSignature, KeyId, RevocationAuthorization,
};
use elder_keys::{KeyError, KeyLifecycleManager, RevocationRegistry, SignedRevocationList, Storage};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::error::QuorumError;

/// Produces one Elder's signature over canonical header bytes.
///
/// Private key material is decrypted inside [`KeyLifecycleManager::with_active_key`]
/// for the duration of a single signature and never held here.
pub struct Signer<K: Storage, R: Storage> {
    lifecycle: Arc<KeyLifecycleManager<K>>,
    revocations: Arc<RevocationRegistry<R>>,
    audit: Arc<dyn AuditSink>,
}

impl<K: Storage, R: Storage> Signer<K, R> {
    pub fn new(
        lifecycle: Arc<KeyLifecycleManager<K>>,
        revocations: Arc<RevocationRegistry<R>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Signer {
            lifecycle,
            revocations,
            audit,
        }
    }

    /// Sign `header_bytes` with `key_id` at time `now`
    pub async fn sign(
        &self,
        header_bytes: &[u8],
        key_id: &KeyId,
        now: u64,
    ) -> Result<IndividualSignature, QuorumError> {
        let entry = self.lifecycle.get(key_id).await?;
        if self.revocations.is_revoked(key_id, now).await {
            return Err(KeyError::KeyRevoked(*key_id).into());
        }
        let header = CanonicalHeader::from_canonical_bytes(header_bytes)?;
        let header_hash = hash_blake3(header_bytes);
        let payload = signing_payload(&header_hash, &entry.owner_id, key_id, now);

        let signature_bytes = self
            .lifecycle
            .with_active_key(key_id, now, |entry, secret| {
                scheme_for(entry.algorithm).sign(secret, &payload)
            })
            .await??;

        let signature = IndividualSignature {
            elder_id: entry.owner_id.clone(),
            key_id: *key_id,
            header_hash,
            signature_bytes,
            algorithm: entry.algorithm,
            signed_at: now,
        };

        let event = AuditEvent {
            elder_id: signature.elder_id.clone(),
            key_id: *key_id,
            header_hash,
            height: header.index,
            signed_at: now,
        };
        if let Err(e) = self.audit.record(&event) {
            warn!("Failed to record signing audit event: {}", e);
        }

        debug!(
            "Elder {} signed header {} at height {} with key {}",
            signature.elder_id, header_hash, header.index, key_id
        );
        Ok(signature)
    }

    /// Sign with the Elder's current active key
    pub async fn sign_as(
        &self,
        elder_id: &ElderId,
        header_bytes: &[u8],
        now: u64,
    ) -> Result<IndividualSignature, QuorumError> {
        let active = self.lifecycle.active_key(elder_id).await?;
        self.sign(header_bytes, &active.key_id, now).await
    }

    /// Sign `payload` with the Elder's active key on behalf of a revocation
    /// authority. The key must be usable at both `now` and `issued_at`.
    async fn cosign(
        &self,
        elder_id: &ElderId,
        payload: &[u8],
        issued_at: u64,
        now: u64,
    ) -> Result<(KeyId, Vec<u8>), QuorumError> {
        if issued_at > now {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "authorization issued at {} is in the future",
                issued_at
            ))
            .into());
        }
        let active = self.lifecycle.active_key(elder_id).await?;
        if self.revocations.is_revoked(&active.key_id, issued_at).await {
            return Err(KeyError::KeyRevoked(active.key_id).into());
        }
        if issued_at < active.created_at {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "key {} did not exist at {}",
                active.key_id, issued_at
            ))
            .into());
        }

        let signature = self
            .lifecycle
            .with_active_key(&active.key_id, now, |entry, secret| {
                scheme_for(entry.algorithm).sign(secret, payload)
            })
            .await??;
        Ok((active.key_id, signature))
    }

    /// Add this Elder's co-signature to a revocation authorization
    pub async fn cosign_revocation(
        &self,
        elder_id: &ElderId,
        target: &KeyId,
        reason: &str,
        authorization: &mut RevocationAuthorization,
        now: u64,
    ) -> Result<(), QuorumError> {
        let issued_at = authorization.issued_at;
        let payload = revocation_payload(target, reason, issued_at);
        let (key_id, signature) = self.cosign(elder_id, &payload, issued_at, now).await?;
        authorization.push(elder_id.as_str(), Some(key_id), signature);

        debug!("Elder {} co-signed revocation of {}", elder_id, target);
        Ok(())
    }

    /// Add this Elder's endorsement to an exported revocation list
    pub async fn endorse_revocation_list(
        &self,
        elder_id: &ElderId,
        list: &mut SignedRevocationList,
        now: u64,
    ) -> Result<(), QuorumError> {
        let payload = list.payload()?;
        let (key_id, signature) = self.cosign(elder_id, &payload, list.issued_at, now).await?;
        list.endorse(elder_id, key_id, signature);

        debug!(
            "Elder {} endorsed revocation list of {} entries",
            elder_id,
            list.entries.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use elder_core::{Hash, SignatureAlgorithm, SigningIdentity};
    use elder_keys::{DesignatedAuthority, MasterKey, MemoryStorage};

    struct Fixture {
        signer: Signer<MemoryStorage, MemoryStorage>,
        lifecycle: Arc<KeyLifecycleManager<MemoryStorage>>,
        revocations: Arc<RevocationRegistry<MemoryStorage>>,
        audit: Arc<MemoryAuditLog>,
        authority: SigningIdentity,
    }

    fn fixture() -> Fixture {
        let lifecycle = Arc::new(KeyLifecycleManager::new(
            MemoryStorage::new(),
            &MasterKey::generate(),
        ));
        let authority = SigningIdentity::generate(SignatureAlgorithm::Ed25519);
        let revocations = Arc::new(
            RevocationRegistry::open(
                MemoryStorage::new(),
                Arc::new(DesignatedAuthority::new("security", &authority)),
            )
            .unwrap(),
        );
        let audit = Arc::new(MemoryAuditLog::new());
        let signer = Signer::new(lifecycle.clone(), revocations.clone(), audit.clone());
        Fixture {
            signer,
            lifecycle,
            revocations,
            audit,
            authority,
        }
    }

    fn header(index: u64) -> Vec<u8> {
        CanonicalHeader {
            index,
            previous_hash: Hash::ZERO,
            commitment_root: hash_blake3(b"root"),
            timestamp: 1_000,
            proposer_id: "elder_0".to_string(),
            nonce: 7,
            difficulty: 1,
        }
        .to_canonical_bytes()
    }

    #[tokio::test]
    async fn test_sign_produces_verifiable_signature() {
        let f = fixture();
        let elder = ElderId::from("elder_0");
        let record = f
            .lifecycle
            .generate(&elder, SignatureAlgorithm::Ed25519, 10_000, 0)
            .await
            .unwrap();

        let bytes = header(3);
        let sig = f.signer.sign(&bytes, &record.key_id, 100).await.unwrap();
        assert_eq!(sig.elder_id, elder);
        assert_eq!(sig.header_hash, hash_blake3(&bytes));
        assert_eq!(sig.signed_at, 100);
        assert!(sig.verify_with(&record.public_key).is_ok());

        let events = f.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].height, 3);
        assert_eq!(events[0].key_id, record.key_id);
    }

    #[tokio::test]
    async fn test_sign_refuses_bad_keys() {
        let f = fixture();
        let elder = ElderId::from("elder_0");
        let record = f
            .lifecycle
            .generate(&elder, SignatureAlgorithm::Ed25519, 1_000, 0)
            .await
            .unwrap();
        let bytes = header(1);

        assert!(matches!(
            f.signer.sign(&bytes, &KeyId([0u8; 16]), 10).await,
            Err(QuorumError::Key(KeyError::KeyNotFound(_)))
        ));
        assert!(matches!(
            f.signer.sign(&bytes, &record.key_id, 1_000).await,
            Err(QuorumError::Key(KeyError::KeyExpired(_)))
        ));
        assert!(matches!(
            f.signer.sign(b"not a header", &record.key_id, 10).await,
            Err(QuorumError::Core(_))
        ));

        let auth = RevocationAuthorization::designated(
            "security",
            &f.authority,
            &record.key_id,
            "compromised",
            50,
        )
        .unwrap();
        f.revocations
            .revoke(&record.key_id, "compromised", auth, 50)
            .await
            .unwrap();
        // Still fine before the revocation takes effect
        assert!(f.signer.sign(&bytes, &record.key_id, 49).await.is_ok());
        assert!(matches!(
            f.signer.sign(&bytes, &record.key_id, 50).await,
            Err(QuorumError::Key(KeyError::KeyRevoked(_)))
        ));
        assert_eq!(f.audit.events().len(), 1);
    }

    #[tokio::test]
    async fn test_rotated_key_cannot_sign() {
        let f = fixture();
        let elder = ElderId::from("elder_0");
        let old = f
            .lifecycle
            .generate(&elder, SignatureAlgorithm::Ed25519Blake3, 10_000, 0)
            .await
            .unwrap();
        let new = f.lifecycle.rotate(&elder, 10_000, 100).await.unwrap();

        assert!(matches!(
            f.signer.sign(&header(1), &old.key_id, 200).await,
            Err(QuorumError::Key(KeyError::KeyNotActive { .. }))
        ));
        let sig = f.signer.sign_as(&elder, &header(1), 200).await.unwrap();
        assert_eq!(sig.key_id, new.key_id);
        assert_eq!(sig.algorithm, SignatureAlgorithm::Ed25519Blake3);
    }

    #[tokio::test]
    async fn test_cosign_revocation() {
        let f = fixture();
        let elder = ElderId::from("elder_0");
        let record = f
            .lifecycle
            .generate(&elder, SignatureAlgorithm::Ed25519, 10_000, 0)
            .await
            .unwrap();
        let target = KeyId([5u8; 16]);

        let mut auth = RevocationAuthorization::new(100);
        f.signer
            .cosign_revocation(&elder, &target, "compromised", &mut auth, 120)
            .await
            .unwrap();
        assert_eq!(auth.signatures.len(), 1);
        assert_eq!(auth.signatures[0].key_id, Some(record.key_id));
        assert!(scheme_for(record.algorithm)
            .verify(
                &record.public_key,
                &revocation_payload(&target, "compromised", 100),
                &auth.signatures[0].signature
            )
            .is_ok());
        assert!(scheme_for(record.algorithm)
            .verify(
                &record.public_key,
                &revocation_payload(&target, "compromised", 50),
                &auth.signatures[0].signature
            )
            .is_err());
    }

    #[tokio::test]
    async fn test_endorse_revocation_list() {
        let f = fixture();
        let elder = ElderId::from("elder_0");
        let record = f
            .lifecycle
            .generate(&elder, SignatureAlgorithm::Ed25519, 10_000, 0)
            .await
            .unwrap();
        let issuer = SigningIdentity::generate(SignatureAlgorithm::Ed25519);
        let mut list = SignedRevocationList::sign(&issuer, "elder-quorum", &[], 400).unwrap();

        f.signer
            .endorse_revocation_list(&elder, &mut list, 400)
            .await
            .unwrap();
        assert_eq!(list.endorsements.len(), 1);
        assert_eq!(list.endorsements[0].signer, "elder_0");
        assert!(scheme_for(record.algorithm)
            .verify(
                &record.public_key,
                &list.payload().unwrap(),
                &list.endorsements[0].signature
            )
            .is_ok());
        // Endorsements do not change what the issuer signed
        assert!(list.verify(issuer.public_key()).is_ok());
    }

    #[tokio::test]
    async fn test_cosign_refuses_unusable_issue_time() {
        let f = fixture();
        let elder = ElderId::from("elder_0");
        let record = f
            .lifecycle
            .generate(&elder, SignatureAlgorithm::Ed25519, 10_000, 200)
            .await
            .unwrap();
        let target = KeyId([6u8; 16]);

        let mut future = RevocationAuthorization::new(500);
        assert!(f
            .signer
            .cosign_revocation(&elder, &target, "x", &mut future, 300)
            .await
            .is_err());

        let mut before_key = RevocationAuthorization::new(100);
        assert!(f
            .signer
            .cosign_revocation(&elder, &target, "x", &mut before_key, 300)
            .await
            .is_err());

        let auth = RevocationAuthorization::designated(
            "security",
            &f.authority,
            &record.key_id,
            "compromised",
            250,
        )
        .unwrap();
        f.revocations
            .revoke(&record.key_id, "compromised", auth, 250)
            .await
            .unwrap();
        let mut after_revocation = RevocationAuthorization::new(260);
        assert!(matches!(
            f.signer
                .cosign_revocation(&elder, &target, "x", &mut after_revocation, 300)
                .await,
            Err(QuorumError::Key(KeyError::KeyRevoked(_)))
        ));
        assert!(future.signatures.is_empty());
        assert!(before_key.signatures.is_empty());
        assert!(after_revocation.signatures.is_empty());
    }
}
