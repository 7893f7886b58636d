pub mod memory;
pub mod persistent;

use std::collections::BTreeMap;

use crate::error::KeyError;

/// Key-value persistence for key records and revocations.
///
/// Writes are staged and become visible to other handles only on
/// [`Storage::commit`], which lets a rotation land both records atomically.
/// Records are never deleted, so there is no delete operation.
pub trait Storage: Send + Sync {
    /// Get a value by key, including staged writes
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Stage a key-value pair
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Make staged writes durable
    fn commit(&mut self) -> Result<(), KeyError>;

    /// Discard staged writes
    fn rollback(&mut self);

    /// All `(key, value)` pairs under a prefix, sorted by key
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// Committed data plus a batch of staged writes
#[derive(Debug, Clone, Default)]
pub(crate) struct Staged {
    pub(crate) committed: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Staged {
    pub(crate) fn with_committed(committed: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Staged {
            committed,
            pending: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.pending
            .get(key)
            .or_else(|| self.committed.get(key))
            .cloned()
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) {
        self.pending.insert(key.to_vec(), value.to_vec());
    }

    /// Committed data with the staged writes laid over it
    pub(crate) fn merged(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut merged = self.committed.clone();
        merged.extend(self.pending.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub(crate) fn apply(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.committed.extend(pending);
    }

    pub(crate) fn discard(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<&[u8], &[u8]> = BTreeMap::new();
        for (key, value) in self
            .committed
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.insert(key.as_slice(), value.as_slice());
        }
        for (key, value) in self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.insert(key.as_slice(), value.as_slice());
        }
        merged
            .into_iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect()
    }
}

pub use memory::MemoryStorage;
pub use persistent::FileStorage;
