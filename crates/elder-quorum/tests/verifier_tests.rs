//! Verifier and acceptance-predicate integration tests

mod common;

use std::time::Duration;

use common::{assemble, elder, harness, header, header_hash};
use elder_core::QuorumSignature;
use elder_keys::{KeyRejection, RegistrySnapshot, ThresholdPolicy};
use elder_quorum::{check_signature, tally, verify_quorum, QuorumError};

const WINDOW: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_revocation_after_signing_keeps_quorum_valid() {
    let h = harness(5, ThresholdPolicy::Fixed { m: 3 }, WINDOW).await;
    let bytes = header(1);
    let mut signatures = Vec::new();
    for i in 0..3 {
        signatures.push(h.sign(i, &bytes, 100).await);
    }

    // Produced before the revocation is recorded, but dated after it
    let late_sig = h.sign(1, &bytes, 10_500).await;

    // Long after finalization, elder_1's key is revoked
    let key = h.active_key(1).await;
    h.revoke(&key, 10_000).await;

    let snapshot = h.snapshot(1).await;
    assert!(snapshot.is_revoked_at(&key, 10_000));
    let quorum = assemble(1, &bytes, signatures.clone(), &snapshot);
    let verdict = verify_quorum(&bytes, &quorum, &snapshot);
    assert!(verdict.valid);
    assert_eq!(verdict.signers, vec![elder(0), elder(1), elder(2)]);

    // A signature dated at or after the revocation does not count
    let mut late = signatures;
    late[1] = late_sig;
    let verdict = verify_quorum(&bytes, &assemble(1, &bytes, late, &snapshot), &snapshot);
    assert!(!verdict.valid);
    assert_eq!(verdict.signers, vec![elder(0), elder(2)]);
}

#[tokio::test]
async fn test_verification_is_deterministic() {
    let h = harness(5, ThresholdPolicy::Fixed { m: 3 }, WINDOW).await;
    let bytes = header(2);
    let snapshot = h.snapshot(2).await;
    let session = h.coordinator.open(&bytes, snapshot.clone()).await.unwrap();
    for i in [4, 0, 2] {
        let sig = h.sign(i, &bytes, 100).await;
        h.coordinator.submit(session, sig).await.unwrap();
    }
    let quorum = h.coordinator.evaluate(session).await.unwrap();

    // Ship both artifacts as another node would receive them
    let snapshot_json = serde_json::to_string(&*snapshot).unwrap();
    let quorum_json = serde_json::to_string(&quorum).unwrap();

    let first = verify_quorum(&bytes, &quorum, &snapshot);
    let mut handles = Vec::new();
    for delay in [0u64, 5, 20] {
        let bytes = bytes.clone();
        let snapshot_json = snapshot_json.clone();
        let quorum_json = quorum_json.clone();
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let snapshot: RegistrySnapshot = serde_json::from_str(&snapshot_json).unwrap();
            let quorum: QuorumSignature = serde_json::from_str(&quorum_json).unwrap();
            verify_quorum(&bytes, &quorum, &snapshot)
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), first);
    }

    // Later key-state changes do not touch the pinned snapshot
    h.lifecycle.rotate(&elder(4), common::LIFETIME, 5_000).await.unwrap();
    h.revoke(&h.active_key(0).await, 6_000).await;
    assert_eq!(verify_quorum(&bytes, &quorum, &snapshot), first);
    assert!(first.valid);
    assert_eq!(first.signers, vec![elder(4), elder(0), elder(2)]);
}

#[tokio::test]
async fn test_tampering_breaks_verification() {
    let h = harness(5, ThresholdPolicy::Fixed { m: 3 }, WINDOW).await;
    let bytes = header(3);
    let snapshot = h.snapshot(3).await;
    let mut signatures = Vec::new();
    for i in 0..4 {
        signatures.push(h.sign(i, &bytes, 100).await);
    }

    let exact = assemble(3, &bytes, signatures[..3].to_vec(), &snapshot);
    assert!(verify_quorum(&bytes, &exact, &snapshot).valid);

    // Any header byte
    for position in [0, 4, 20, bytes.len() - 1] {
        let mut flipped = bytes.clone();
        flipped[position] ^= 0x80;
        assert!(!verify_quorum(&flipped, &exact, &snapshot).valid);
    }

    // One signature byte drops the count below threshold
    let mut broken = exact.clone();
    broken.signatures[1].signature_bytes[10] ^= 0x01;
    let verdict = verify_quorum(&bytes, &broken, &snapshot);
    assert!(!verdict.valid);
    assert_eq!(verdict.signers, vec![elder(0), elder(2)]);

    // With a spare signature the quorum survives one bad signature
    let mut spare = assemble(3, &bytes, signatures.clone(), &snapshot);
    spare.signatures[1].signature_bytes[10] ^= 0x01;
    let verdict = verify_quorum(&bytes, &spare, &snapshot);
    assert!(verdict.valid);
    assert_eq!(verdict.signers, vec![elder(0), elder(2), elder(3)]);
}

#[tokio::test]
async fn test_rotated_key_verifies_historical_signature() {
    let h = harness(3, ThresholdPolicy::TwoThirds, WINDOW).await;
    let bytes = header(4);
    let old_key = h.active_key(0).await;
    let signatures = vec![h.sign(0, &bytes, 100).await, h.sign(1, &bytes, 100).await];

    h.lifecycle.rotate(&elder(0), common::LIFETIME, 500).await.unwrap();
    assert!(h.signer.sign(&bytes, &old_key, 600).await.is_err());

    let snapshot = h.snapshot(4).await;
    let quorum = assemble(4, &bytes, signatures, &snapshot);
    let verdict = verify_quorum(&bytes, &quorum, &snapshot);
    assert!(verdict.valid);
    assert_eq!(verdict.signers, vec![elder(0), elder(1)]);
}

#[tokio::test]
async fn test_quorum_claims_are_not_trusted() {
    let h = harness(5, ThresholdPolicy::Fixed { m: 3 }, WINDOW).await;
    let bytes = header(5);
    let snapshot = h.snapshot(5).await;
    let a = h.sign(0, &bytes, 100).await;
    let b = h.sign(1, &bytes, 100).await;
    let b_again = h.sign(1, &bytes, 200).await;

    // Padding with the same Elder and lowering the claimed threshold
    let mut quorum = assemble(5, &bytes, vec![a, b.clone(), b, b_again], &snapshot);
    quorum.threshold = 2;
    quorum.is_valid = true;
    let verdict = verify_quorum(&bytes, &quorum, &snapshot);
    assert!(!verdict.valid);
    assert_eq!(verdict.signers, vec![elder(0), elder(1)]);
}

#[tokio::test]
async fn test_snapshot_height_must_match() {
    let h = harness(3, ThresholdPolicy::TwoThirds, WINDOW).await;
    let bytes = header(6);
    let signatures = vec![h.sign(0, &bytes, 100).await, h.sign(1, &bytes, 100).await];
    let pinned = h.snapshot(6).await;
    let quorum = assemble(6, &bytes, signatures, &pinned);
    assert!(verify_quorum(&bytes, &quorum, &pinned).valid);

    let other = h.snapshot(7).await;
    assert!(!verify_quorum(&bytes, &quorum, &other).valid);
}

#[tokio::test]
async fn test_acceptance_predicate_reasons() {
    let h = harness(3, ThresholdPolicy::TwoThirds, WINDOW).await;
    let bytes = header(8);
    let hash = header_hash(&bytes);
    let good = h.sign(0, &bytes, 100).await;
    let snapshot = h.snapshot(8).await;

    assert!(check_signature(&snapshot, &hash, &good).is_ok());
    assert!(matches!(
        check_signature(&snapshot, &header_hash(&header(9)), &good),
        Err(QuorumError::StaleHeader)
    ));

    let mut forged = good.clone();
    forged.signature_bytes[0] ^= 0x01;
    assert!(matches!(
        check_signature(&snapshot, &hash, &forged),
        Err(QuorumError::InvalidSignature(_))
    ));

    let mut backdated = good.clone();
    backdated.signed_at = common::LIFETIME;
    assert!(matches!(
        check_signature(&snapshot, &hash, &backdated),
        Err(QuorumError::KeyRejected(KeyRejection::Expired(_)))
    ));

    let result = tally(&snapshot, &hash, &[good.clone(), forged, good]);
    assert_eq!(result.accepted, vec![0]);
    assert_eq!(result.count(), 1);
    assert_eq!(result.rejected.len(), 2);
    assert!(matches!(result.rejected[1].1, QuorumError::DuplicateSigner(_)));
}
