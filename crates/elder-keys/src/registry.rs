use std::collections::BTreeMap;

use elder_core::ElderId;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// How many distinct signers a quorum needs, given the enrolled count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Explicit m-of-n
    Fixed { m: usize },
    /// ceil(2n/3)
    TwoThirds,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::TwoThirds
    }
}

impl ThresholdPolicy {
    /// Resolve the threshold for `n` enrolled Elders
    pub fn resolve(&self, n: usize) -> Result<usize, KeyError> {
        let m = match self {
            ThresholdPolicy::Fixed { m } => *m,
            ThresholdPolicy::TwoThirds => (2 * n).div_ceil(3),
        };
        if m == 0 || m > n {
            return Err(KeyError::InvalidThreshold { m, n });
        }
        Ok(m)
    }
}

/// Enrollment record supplied by governance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElderEnrollment {
    pub elder_id: ElderId,
    pub enrolled: bool,
    pub enrolled_at_height: u64,
}

impl ElderEnrollment {
    pub fn enrolled_at(elder_id: impl Into<String>, height: u64) -> Self {
        ElderEnrollment {
            elder_id: ElderId::new(elder_id),
            enrolled: true,
            enrolled_at_height: height,
        }
    }

    /// Whether this Elder counts toward the quorum at `height`
    pub fn counts_at(&self, height: u64) -> bool {
        self.enrolled && self.enrolled_at_height <= height
    }
}

/// Read-only view of the Elder set. Governance owns enrollment; this crate
/// only consumes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElderRegistry {
    elders: BTreeMap<ElderId, ElderEnrollment>,
}

impl ElderRegistry {
    pub fn new(enrollments: impl IntoIterator<Item = ElderEnrollment>) -> Self {
        ElderRegistry {
            elders: enrollments
                .into_iter()
                .map(|e| (e.elder_id.clone(), e))
                .collect(),
        }
    }

    pub fn get(&self, elder_id: &ElderId) -> Option<&ElderEnrollment> {
        self.elders.get(elder_id)
    }

    pub fn contains(&self, elder_id: &ElderId) -> bool {
        self.elders.contains_key(elder_id)
    }

    /// All known Elders, ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &ElderEnrollment> {
        self.elders.values()
    }

    pub fn enrolled_count_at(&self, height: u64) -> usize {
        self.elders.values().filter(|e| e.counts_at(height)).count()
    }

    pub fn len(&self) -> usize {
        self.elders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elders.is_empty()
    }
}
