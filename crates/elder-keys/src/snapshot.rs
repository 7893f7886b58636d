use std::collections::BTreeMap;

use elder_core::{
    hash_domain, serialize, ElderId, ElderIdentity, Hash, KeyId, KeyStatus, SignatureAlgorithm,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::KeyError;
use crate::lifecycle::KeyLifecycleManager;
use crate::registry::{ElderRegistry, ThresholdPolicy};
use crate::revocation::RevocationRegistry;
use crate::storage::Storage;

const SNAPSHOT_DIGEST_CONTEXT: &str = "elder-quorum registry snapshot v1";

/// Why a key cannot vouch for a signature at a given time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyRejection {
    #[error("Unknown elder: {0}")]
    UnknownElder(ElderId),

    #[error("Elder {0} is not enrolled at this height")]
    NotEnrolled(ElderId),

    #[error("Unknown key: {0}")]
    UnknownKey(KeyId),

    #[error("Key {key_id} belongs to {owner}")]
    WrongOwner { key_id: KeyId, owner: ElderId },

    #[error("Key {0} does not use the claimed algorithm")]
    AlgorithmMismatch(KeyId),

    #[error("Key {0} was not yet created")]
    NotYetValid(KeyId),

    #[error("Key {0} had expired")]
    Expired(KeyId),

    #[error("Key {0} had been rotated out")]
    Rotated(KeyId),

    #[error("Key {0} had been revoked")]
    Revoked(KeyId),
}

/// Public half of a key as of the snapshot height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub owner_id: ElderId,
    pub algorithm: SignatureAlgorithm,
    pub public_key: Vec<u8>,
    pub created_at: u64,
    pub expires_at: u64,
    pub rotated_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElderSnapshot {
    pub elder_id: ElderId,
    /// Counts toward the quorum at the snapshot height
    pub enrolled: bool,
    pub enrolled_at_height: u64,
    pub active_key_id: Option<KeyId>,
    /// Oldest first
    pub key_ids: Vec<KeyId>,
}

/// Immutable, height-pinned view of the Elder set and its keys.
///
/// Everything needed to decide whether a signature counts lives in here, so
/// two nodes holding equal snapshots always reach the same verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub height: u64,
    pub threshold: usize,
    pub total_enrolled: usize,
    pub elders: BTreeMap<ElderId, ElderSnapshot>,
    pub keys: BTreeMap<KeyId, KeySnapshot>,
    /// key id -> revoked_at (unix ms)
    pub revocations: BTreeMap<KeyId, u64>,
}

impl RegistrySnapshot {
    /// Capture the current registry, key and revocation state for `height`
    pub async fn capture<K: Storage, R: Storage>(
        height: u64,
        registry: &ElderRegistry,
        lifecycle: &KeyLifecycleManager<K>,
        revocations: &RevocationRegistry<R>,
        policy: ThresholdPolicy,
    ) -> Result<Self, KeyError> {
        let total_enrolled = registry.enrolled_count_at(height);
        let threshold = policy.resolve(total_enrolled)?;

        let mut elders = BTreeMap::new();
        let mut keys = BTreeMap::new();
        let mut revoked = revocations.revocation_times().await;

        for enrollment in registry.iter() {
            let history = lifecycle.keys_for_owner(&enrollment.elder_id).await?;
            let active_key_id = history
                .iter()
                .find(|entry| entry.status == KeyStatus::Active)
                .map(|entry| entry.key_id);

            for entry in &history {
                if let Some(at) = entry.revoked_at {
                    revoked.entry(entry.key_id).or_insert(at);
                }
                keys.insert(
                    entry.key_id,
                    KeySnapshot {
                        owner_id: entry.owner_id.clone(),
                        algorithm: entry.algorithm,
                        public_key: entry.public_key.clone(),
                        created_at: entry.created_at,
                        expires_at: entry.expires_at,
                        rotated_at: entry.rotated_at,
                    },
                );
            }

            elders.insert(
                enrollment.elder_id.clone(),
                ElderSnapshot {
                    elder_id: enrollment.elder_id.clone(),
                    enrolled: enrollment.counts_at(height),
                    enrolled_at_height: enrollment.enrolled_at_height,
                    active_key_id,
                    key_ids: history.iter().map(|entry| entry.key_id).collect(),
                },
            );
        }

        // Only keep revocations for keys this snapshot knows about
        revoked.retain(|key_id, _| keys.contains_key(key_id));

        debug!(
            "Captured registry snapshot at height {}: {}/{} threshold, {} keys, {} revoked",
            height,
            threshold,
            total_enrolled,
            keys.len(),
            revoked.len()
        );

        Ok(RegistrySnapshot {
            height,
            threshold,
            total_enrolled,
            elders,
            keys,
            revocations: revoked,
        })
    }

    /// Non-retroactive: revoked at `t` iff revoked_at <= t
    pub fn is_revoked_at(&self, key_id: &KeyId, t: u64) -> bool {
        self.revocations
            .get(key_id)
            .is_some_and(|revoked_at| *revoked_at <= t)
    }

    /// Check that `key_id` was `elder_id`'s valid signing key at time `t`
    pub fn key_valid_for(
        &self,
        elder_id: &ElderId,
        key_id: &KeyId,
        algorithm: SignatureAlgorithm,
        t: u64,
    ) -> Result<&KeySnapshot, KeyRejection> {
        let elder = self
            .elders
            .get(elder_id)
            .ok_or_else(|| KeyRejection::UnknownElder(elder_id.clone()))?;
        if !elder.enrolled {
            return Err(KeyRejection::NotEnrolled(elder_id.clone()));
        }

        let key = self
            .keys
            .get(key_id)
            .ok_or(KeyRejection::UnknownKey(*key_id))?;
        if &key.owner_id != elder_id {
            return Err(KeyRejection::WrongOwner {
                key_id: *key_id,
                owner: key.owner_id.clone(),
            });
        }
        if key.algorithm != algorithm {
            return Err(KeyRejection::AlgorithmMismatch(*key_id));
        }
        if t < key.created_at {
            return Err(KeyRejection::NotYetValid(*key_id));
        }
        if t >= key.expires_at {
            return Err(KeyRejection::Expired(*key_id));
        }
        if key.rotated_at.is_some_and(|rotated| t >= rotated) {
            return Err(KeyRejection::Rotated(*key_id));
        }
        if self.is_revoked_at(key_id, t) {
            return Err(KeyRejection::Revoked(*key_id));
        }
        Ok(key)
    }

    /// Identity view of one Elder with its key history
    pub fn identity(&self, elder_id: &ElderId) -> Option<ElderIdentity> {
        self.elders.get(elder_id).map(|elder| ElderIdentity {
            elder_id: elder.elder_id.clone(),
            active_key_id: elder.active_key_id,
            key_ids: elder.key_ids.clone(),
            enrolled: elder.enrolled,
            enrolled_at_height: elder.enrolled_at_height,
        })
    }

    /// Content digest, for comparing snapshots across nodes
    pub fn digest(&self) -> Result<Hash, KeyError> {
        let bytes = serialize::to_bytes(self)?;
        Ok(hash_domain(SNAPSHOT_DIGEST_CONTEXT, &[bytes.as_slice()]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authority::DesignatedAuthority;
    use crate::keystore::MasterKey;
    use crate::registry::ElderEnrollment;
    use crate::storage::MemoryStorage;
    use elder_core::{RevocationAuthorization, SigningIdentity};

    const LIFETIME: u64 = 10_000;

    struct Fixture {
        registry: ElderRegistry,
        lifecycle: KeyLifecycleManager<MemoryStorage>,
        revocations: RevocationRegistry<MemoryStorage>,
        authority: SigningIdentity,
    }

    async fn fixture(n: usize) -> Fixture {
        let registry = ElderRegistry::new(
            (0..n).map(|i| ElderEnrollment::enrolled_at(format!("elder_{}", i), 0)),
        );
        let lifecycle = KeyLifecycleManager::new(MemoryStorage::new(), &MasterKey::generate());
        for enrollment in registry.iter() {
            lifecycle
                .generate(&enrollment.elder_id, SignatureAlgorithm::Ed25519, LIFETIME, 0)
                .await
                .unwrap();
        }
        let authority = SigningIdentity::generate(SignatureAlgorithm::Ed25519);
        let revocations = RevocationRegistry::open(
            MemoryStorage::new(),
            Arc::new(DesignatedAuthority::new("security", &authority)),
        )
        .unwrap();
        Fixture {
            registry,
            lifecycle,
            revocations,
            authority,
        }
    }

    #[tokio::test]
    async fn test_capture_counts_and_threshold() {
        let f = fixture(5).await;
        let snapshot = RegistrySnapshot::capture(
            7,
            &f.registry,
            &f.lifecycle,
            &f.revocations,
            ThresholdPolicy::Fixed { m: 3 },
        )
        .await
        .unwrap();

        assert_eq!(snapshot.height, 7);
        assert_eq!(snapshot.threshold, 3);
        assert_eq!(snapshot.total_enrolled, 5);
        assert_eq!(snapshot.elders.len(), 5);
        assert_eq!(snapshot.keys.len(), 5);

        let identity = snapshot.identity(&ElderId::from("elder_0")).unwrap();
        assert!(identity.enrolled);
        assert_eq!(identity.key_ids.len(), 1);
        assert_eq!(identity.active_key_id, Some(identity.key_ids[0]));
    }

    #[tokio::test]
    async fn test_key_window_rules() {
        let f = fixture(3).await;
        let owner = ElderId::from("elder_0");
        let old = f.lifecycle.active_key(&owner).await.unwrap();
        f.lifecycle.rotate(&owner, LIFETIME, 500).await.unwrap();

        let snapshot = RegistrySnapshot::capture(
            1,
            &f.registry,
            &f.lifecycle,
            &f.revocations,
            ThresholdPolicy::TwoThirds,
        )
        .await
        .unwrap();
        let alg = SignatureAlgorithm::Ed25519;

        assert!(snapshot.key_valid_for(&owner, &old.key_id, alg, 499).is_ok());
        assert_eq!(
            snapshot.key_valid_for(&owner, &old.key_id, alg, 500),
            Err(KeyRejection::Rotated(old.key_id))
        );
        assert!(matches!(
            snapshot.key_valid_for(&ElderId::from("elder_1"), &old.key_id, alg, 100),
            Err(KeyRejection::WrongOwner { .. })
        ));
        assert_eq!(
            snapshot.key_valid_for(&owner, &old.key_id, SignatureAlgorithm::Ed25519Blake3, 100),
            Err(KeyRejection::AlgorithmMismatch(old.key_id))
        );
        assert_eq!(
            snapshot.key_valid_for(&ElderId::from("nobody"), &old.key_id, alg, 100),
            Err(KeyRejection::UnknownElder(ElderId::from("nobody")))
        );

        let new = f.lifecycle.active_key(&owner).await.unwrap();
        assert_eq!(
            snapshot.key_valid_for(&owner, &new.key_id, alg, 499),
            Err(KeyRejection::NotYetValid(new.key_id))
        );
        assert_eq!(
            snapshot.key_valid_for(&owner, &new.key_id, alg, 500 + LIFETIME),
            Err(KeyRejection::Expired(new.key_id))
        );
    }

    #[tokio::test]
    async fn test_revocation_is_not_retroactive() {
        let f = fixture(3).await;
        let owner = ElderId::from("elder_1");
        let key = f.lifecycle.active_key(&owner).await.unwrap();
        let auth = RevocationAuthorization::designated(
            "security",
            &f.authority,
            &key.key_id,
            "compromised",
            1_000,
        )
        .unwrap();
        f.revocations
            .revoke(&key.key_id, "compromised", auth, 1_000)
            .await
            .unwrap();

        let snapshot = RegistrySnapshot::capture(
            1,
            &f.registry,
            &f.lifecycle,
            &f.revocations,
            ThresholdPolicy::TwoThirds,
        )
        .await
        .unwrap();
        let alg = SignatureAlgorithm::Ed25519;
        assert!(snapshot.key_valid_for(&owner, &key.key_id, alg, 999).is_ok());
        assert_eq!(
            snapshot.key_valid_for(&owner, &key.key_id, alg, 1_000),
            Err(KeyRejection::Revoked(key.key_id))
        );
    }

    #[tokio::test]
    async fn test_late_enrollment_excluded() {
        let mut f = fixture(3).await;
        let late = ElderEnrollment::enrolled_at("elder_9", 50);
        let mut all: Vec<_> = f.registry.iter().cloned().collect();
        all.push(late);
        f.registry = ElderRegistry::new(all);

        let snapshot = RegistrySnapshot::capture(
            10,
            &f.registry,
            &f.lifecycle,
            &f.revocations,
            ThresholdPolicy::TwoThirds,
        )
        .await
        .unwrap();
        assert_eq!(snapshot.total_enrolled, 3);
        assert_eq!(snapshot.threshold, 2);
        assert!(!snapshot.elders[&ElderId::from("elder_9")].enrolled);
    }

    #[tokio::test]
    async fn test_digest_is_stable() {
        let f = fixture(3).await;
        let capture = || {
            RegistrySnapshot::capture(
                4,
                &f.registry,
                &f.lifecycle,
                &f.revocations,
                ThresholdPolicy::TwoThirds,
            )
        };
        let a = capture().await.unwrap();
        let b = capture().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let json = serde_json::to_string(&a).unwrap();
        let back: RegistrySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.digest().unwrap(), a.digest().unwrap());
    }
}
