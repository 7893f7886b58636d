use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use elder_core::serialize;

use super::{Staged, Storage};
use crate::error::KeyError;

/// File-backed storage using a single snapshot file, rewritten atomically
/// (temp file + rename) on every commit.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    inner: Staged,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self, KeyError> {
        let path = path.into();
        let committed = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| KeyError::Storage(e.to_string()))?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                serialize::from_bytes(&bytes)
                    .map_err(|e| KeyError::Serialization(e.to_string()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(FileStorage {
            path,
            inner: Staged::with_committed(committed),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), KeyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| KeyError::Storage(e.to_string()))?;
        }

        let bytes = serialize::to_bytes(data)
            .map_err(|e| KeyError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| KeyError::Storage(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| KeyError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    /// Writes the merged state first; memory only changes once it is on disk
    fn commit(&mut self) -> Result<(), KeyError> {
        self.flush_to_disk(&self.inner.merged())?;
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
