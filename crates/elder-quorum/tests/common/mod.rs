//! Shared fixtures for quorum integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use elder_core::{
    hash_blake3, CanonicalHeader, ElderId, Hash, IndividualSignature, KeyId, QuorumSignature,
    RevocationAuthorization, SignatureAlgorithm, SigningIdentity,
};
use elder_keys::{
    DesignatedAuthority, ElderEnrollment, ElderRegistry, KeyLifecycleManager, MasterKey,
    MemoryStorage, RegistrySnapshot, RevocationRegistry, ThresholdPolicy,
};
use elder_quorum::{CoordinatorConfig, MemoryAuditLog, QuorumCoordinator, Signer};

pub const LIFETIME: u64 = 1_000_000;

pub struct Harness {
    pub registry: ElderRegistry,
    pub policy: ThresholdPolicy,
    pub lifecycle: Arc<KeyLifecycleManager<MemoryStorage>>,
    pub revocations: Arc<RevocationRegistry<MemoryStorage>>,
    pub signer: Signer<MemoryStorage, MemoryStorage>,
    pub audit: Arc<MemoryAuditLog>,
    pub coordinator: Arc<QuorumCoordinator<MemoryStorage>>,
    pub authority: SigningIdentity,
}

pub fn elder(i: usize) -> ElderId {
    ElderId::new(format!("elder_{}", i))
}

pub fn header(index: u64) -> Vec<u8> {
    CanonicalHeader {
        index,
        previous_hash: hash_blake3(&index.to_be_bytes()),
        commitment_root: hash_blake3(b"commitments"),
        timestamp: 1_700_000_000_000 + index,
        proposer_id: "elder_0".to_string(),
        nonce: 42,
        difficulty: 4,
    }
    .to_canonical_bytes()
}

/// `n` enrolled Elders, each with an Ed25519 key created at t=0
pub async fn harness(n: usize, policy: ThresholdPolicy, timeout: Duration) -> Harness {
    let registry =
        ElderRegistry::new((0..n).map(|i| ElderEnrollment::enrolled_at(elder(i).0, 0)));
    let lifecycle = Arc::new(KeyLifecycleManager::new(
        MemoryStorage::new(),
        &MasterKey::generate(),
    ));
    for i in 0..n {
        lifecycle
            .generate(&elder(i), SignatureAlgorithm::Ed25519, LIFETIME, 0)
            .await
            .unwrap();
    }

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
    let coordinator = Arc::new(QuorumCoordinator::new(
        CoordinatorConfig {
            collection_timeout: timeout,
        },
        revocations.clone(),
    ));

    Harness {
        registry,
        policy,
        lifecycle,
        revocations,
        signer,
        audit,
        coordinator,
        authority,
    }
}

impl Harness {
    pub async fn snapshot(&self, height: u64) -> Arc<RegistrySnapshot> {
        Arc::new(
            RegistrySnapshot::capture(
                height,
                &self.registry,
                &*self.lifecycle,
                &*self.revocations,
                self.policy,
            )
            .await
            .unwrap(),
        )
    }

    pub async fn active_key(&self, i: usize) -> KeyId {
        self.lifecycle.active_key(&elder(i)).await.unwrap().key_id
    }

    pub async fn sign(&self, i: usize, header: &[u8], at: u64) -> IndividualSignature {
        self.signer.sign_as(&elder(i), header, at).await.unwrap()
    }

    pub async fn revoke(&self, key_id: &KeyId, at: u64) {
        let auth =
            RevocationAuthorization::designated("security", &self.authority, key_id, "test", at)
                .unwrap();
        self.revocations.revoke(key_id, "test", auth, at).await.unwrap();
        self.lifecycle.mark_revoked(key_id, at).await.unwrap();
    }
}

/// Assemble a quorum signature by hand, bypassing the coordinator
pub fn assemble(
    height: u64,
    header: &[u8],
    signatures: Vec<IndividualSignature>,
    snapshot: &RegistrySnapshot,
) -> QuorumSignature {
    QuorumSignature {
        height,
        header: header.to_vec(),
        header_hash: hash_blake3(header),
        signatures,
        threshold: snapshot.threshold,
        total_enrolled: snapshot.total_enrolled,
        is_valid: true,
    }
}

pub fn header_hash(header: &[u8]) -> Hash {
    hash_blake3(header)
}
