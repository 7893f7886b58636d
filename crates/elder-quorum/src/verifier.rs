use elder_core::{hash_blake3, CanonicalHeader, ElderId, QuorumSignature};
use elder_keys::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::acceptance::tally;

/// Verdict of [`verify_quorum`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub valid: bool,
    /// Distinct Elders whose signatures counted, in the quorum's order
    pub signers: Vec<ElderId>,
}

impl Verification {
    fn invalid() -> Self {
        Verification {
            valid: false,
            signers: Vec::new(),
        }
    }
}

/// Re-verify a quorum signature over `header` against a height-pinned
/// snapshot.
///
/// Runs the same acceptance predicate and dedup rule as the coordinator,
/// with the threshold taken from the snapshot. The `threshold` and
/// `is_valid` fields carried by `quorum` are never trusted. The result
/// depends only on the three arguments.
pub fn verify_quorum(
    header: &[u8],
    quorum: &QuorumSignature,
    snapshot: &RegistrySnapshot,
) -> Verification {
    let decoded = match CanonicalHeader::from_canonical_bytes(header) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!("Rejecting quorum: {}", e);
            return Verification::invalid();
        }
    };
    if decoded.index != snapshot.height || quorum.height != snapshot.height {
        debug!(
            "Rejecting quorum: header height {}, quorum height {}, snapshot height {}",
            decoded.index, quorum.height, snapshot.height
        );
        return Verification::invalid();
    }

    let header_hash = hash_blake3(header);
    if quorum.header.as_slice() != header || quorum.header_hash != header_hash {
        debug!("Rejecting quorum: attests to a different header");
        return Verification::invalid();
    }

    let result = tally(snapshot, &header_hash, &quorum.signatures);
    for (index, reason) in &result.rejected {
        debug!("Quorum signature {} not counted: {}", index, reason);
    }

    Verification {
        valid: result.count() >= snapshot.threshold,
        signers: result.signers,
    }
}
