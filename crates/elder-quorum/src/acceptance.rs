use std::collections::HashSet;

use elder_core::{ElderId, Hash, IndividualSignature};
use elder_keys::RegistrySnapshot;

use crate::error::QuorumError;

/// Decide whether one signature counts toward the quorum for `header_hash`.
///
/// Depends only on its arguments: the claimed key must have been the
/// signer's valid key at `signed_at` according to `snapshot`, and the
/// signature must verify over the bound payload.
pub fn check_signature(
    snapshot: &RegistrySnapshot,
    header_hash: &Hash,
    signature: &IndividualSignature,
) -> Result<(), QuorumError> {
    if &signature.header_hash != header_hash {
        return Err(QuorumError::StaleHeader);
    }

    let key = snapshot.key_valid_for(
        &signature.elder_id,
        &signature.key_id,
        signature.algorithm,
        signature.signed_at,
    )?;

    signature
        .verify_with(&key.public_key)
        .map_err(|_| QuorumError::InvalidSignature(signature.elder_id.to_string()))
}

/// Outcome of running the acceptance predicate over a list of signatures
#[derive(Debug, Default)]
pub struct Tally {
    /// Indices of counted signatures, in input order
    pub accepted: Vec<usize>,
    /// Distinct counted signers, in acceptance order
    pub signers: Vec<ElderId>,
    /// Dropped signatures with the reason
    pub rejected: Vec<(usize, QuorumError)>,
}

impl Tally {
    pub fn count(&self) -> usize {
        self.signers.len()
    }
}

/// Apply [`check_signature`] to each signature in order, counting the first
/// accepted signature per Elder. Failures drop that one signature only.
pub fn tally(
    snapshot: &RegistrySnapshot,
    header_hash: &Hash,
    signatures: &[IndividualSignature],
) -> Tally {
    let mut seen = HashSet::new();
    let mut result = Tally::default();

    for (index, signature) in signatures.iter().enumerate() {
        if seen.contains(&signature.elder_id) {
            result.rejected.push((
                index,
                QuorumError::DuplicateSigner(signature.elder_id.to_string()),
            ));
            continue;
        }
        match check_signature(snapshot, header_hash, signature) {
            Ok(()) => {
                seen.insert(signature.elder_id.clone());
                result.accepted.push(index);
                result.signers.push(signature.elder_id.clone());
            }
            Err(e) => result.rejected.push((index, e)),
        }
    }

    result
}
