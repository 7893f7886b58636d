use super::{Staged, Storage};
use crate::error::KeyError;

/// In-memory storage, used by tests and ephemeral nodes
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Staged,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.inner.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.committed.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    fn commit(&mut self) -> Result<(), KeyError> {
        self.inner.apply();
        Ok(())
    }

    fn rollback(&mut self) {
        self.inner.discard();
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.inner.scan_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_writes_visible_before_commit() {
        let mut storage = MemoryStorage::new();
        storage.put(b"idx:a", b"1");
        assert_eq!(storage.get(b"idx:a"), Some(b"1".to_vec()));
        assert!(storage.is_empty());

        storage.commit().unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_rollback_discards_batch() {
        let mut storage = MemoryStorage::new();
        storage.put(b"idx:a", b"1");
        storage.commit().unwrap();

        storage.put(b"idx:a", b"2");
        storage.put(b"idx:b", b"3");
        storage.rollback();

        assert_eq!(storage.get(b"idx:a"), Some(b"1".to_vec()));
        assert_eq!(storage.get(b"idx:b"), None);
    }

    #[test]
    fn test_scan_prefix_merges_and_sorts() {
        let mut storage = MemoryStorage::new();
        storage.put(b"rev:02", b"two");
        storage.put(b"idx:zz", b"other");
        storage.commit().unwrap();
        storage.put(b"rev:01", b"one");
        storage.put(b"rev:02", b"two-updated");

        let rows = storage.scan_prefix(b"rev:");
        assert_eq!(
            rows,
            vec![
                (b"rev:01".to_vec(), b"one".to_vec()),
                (b"rev:02".to_vec(), b"two-updated".to_vec()),
            ]
        );
    }
}
