use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use elder_core::{
    serialize, ElderId, EncryptedBlob, KeyId, KeyRecord, KeyStatus, SignatureAlgorithm,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::KeyError;
use crate::storage::Storage;

const CIPHER_KEY_CONTEXT: &str = "elder-quorum keystore v1 chacha20poly1305";

/// Key prefixes for storage
mod keys {
    pub const INDEX: &[u8] = b"idx:";
    pub const BLOB: &[u8] = b"blob:";
}

fn storage_key(prefix: &[u8], key_id: &KeyId) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(key_id.to_hex().as_bytes());
    key
}

/// Secret the key store's encryption key is derived from
pub struct MasterKey(Zeroizing<[u8; 32]>);

impl MasterKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        MasterKey(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        MasterKey(Zeroizing::new(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let decoded = Zeroizing::new(hex::decode(s.trim()).map_err(elder_core::CoreError::from)?);
        let bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Encryption("master key must be 32 bytes".to_string()))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Export as hex (use with caution)
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0.as_slice()))
    }

    fn cipher_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(blake3::derive_key(CIPHER_KEY_CONTEXT, self.0.as_slice()))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Cleartext index entry: everything about a key except its private half
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIndexEntry {
    pub key_id: KeyId,
    pub owner_id: ElderId,
    pub algorithm: SignatureAlgorithm,
    pub public_key: Vec<u8>,
    pub status: KeyStatus,
    pub created_at: u64,
    pub expires_at: u64,
    pub rotated_at: Option<u64>,
    pub revoked_at: Option<u64>,
}

impl KeyIndexEntry {
    pub fn from_record(record: &KeyRecord) -> Self {
        KeyIndexEntry {
            key_id: record.key_id,
            owner_id: record.owner_id.clone(),
            algorithm: record.algorithm,
            public_key: record.public_key.clone(),
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at,
            rotated_at: record.rotated_at,
            revoked_at: record.revoked_at,
        }
    }

    pub fn into_record(self, encrypted_private_key: EncryptedBlob) -> KeyRecord {
        KeyRecord {
            key_id: self.key_id,
            algorithm: self.algorithm,
            public_key: self.public_key,
            encrypted_private_key,
            owner_id: self.owner_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            rotated_at: self.rotated_at,
            revoked_at: self.revoked_at,
            status: self.status,
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Encrypted-at-rest key storage.
///
/// Layout: one sealed blob per key under `blob:<key_id>` and a cleartext
/// index entry under `idx:<key_id>`, so lookups never decrypt. Blobs are
/// sealed with ChaCha20-Poly1305 under a key derived from the master secret,
/// with the key id as associated data so blobs cannot be swapped between
/// records.
pub struct KeyStore<S: Storage> {
    storage: S,
    cipher_key: Zeroizing<[u8; 32]>,
}

impl<S: Storage> KeyStore<S> {
    pub fn open(storage: S, master: &MasterKey) -> Self {
        KeyStore {
            storage,
            cipher_key: master.cipher_key(),
        }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.cipher_key.as_slice()))
    }

    /// Encrypt private key material for `key_id`
    pub fn seal(&self, key_id: &KeyId, secret: &[u8]) -> Result<EncryptedBlob, KeyError> {
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: secret,
                    aad: key_id.as_bytes().as_slice(),
                },
            )
            .map_err(|_| KeyError::Encryption(format!("failed to seal key {}", key_id)))?;
        Ok(EncryptedBlob { nonce, ciphertext })
    }

    fn unseal(&self, key_id: &KeyId, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        self.cipher()
            .decrypt(
                Nonce::from_slice(&blob.nonce),
                Payload {
                    msg: &blob.ciphertext,
                    aad: key_id.as_bytes().as_slice(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| KeyError::Encryption(format!("failed to unseal key {}", key_id)))
    }

    /// Stage a full record (index + blob); visible to this handle at once,
    /// durable after [`KeyStore::commit`]
    pub fn stage(&mut self, record: &KeyRecord) -> Result<(), KeyError> {
        let blob = serialize::to_bytes(&record.encrypted_private_key)?;
        self.storage
            .put(&storage_key(keys::BLOB, &record.key_id), &blob);
        self.stage_index(&KeyIndexEntry::from_record(record))
    }

    /// Stage an index-only update (status changes never touch the blob)
    pub fn stage_index(&mut self, entry: &KeyIndexEntry) -> Result<(), KeyError> {
        let bytes = serialize::to_bytes(entry)?;
        self.storage
            .put(&storage_key(keys::INDEX, &entry.key_id), &bytes);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), KeyError> {
        self.storage.commit()
    }

    pub fn rollback(&mut self) {
        self.storage.rollback();
    }

    pub fn index(&self, key_id: &KeyId) -> Result<Option<KeyIndexEntry>, KeyError> {
        self.storage
            .get(&storage_key(keys::INDEX, key_id))
            .map(|bytes| serialize::from_bytes(&bytes).map_err(KeyError::from))
            .transpose()
    }

    pub fn record(&self, key_id: &KeyId) -> Result<Option<KeyRecord>, KeyError> {
        let Some(entry) = self.index(key_id)? else {
            return Ok(None);
        };
        let blob_bytes = self
            .storage
            .get(&storage_key(keys::BLOB, key_id))
            .ok_or_else(|| KeyError::Storage(format!("missing blob for key {}", key_id)))?;
        let blob: EncryptedBlob = serialize::from_bytes(&blob_bytes)?;
        Ok(Some(entry.into_record(blob)))
    }

    /// Every index entry, ordered by key id
    pub fn list_index(&self) -> Result<Vec<KeyIndexEntry>, KeyError> {
        self.storage
            .scan_prefix(keys::INDEX)
            .into_iter()
            .map(|(_, bytes)| serialize::from_bytes(&bytes).map_err(KeyError::from))
            .collect()
    }

    /// Decrypt the private key for the duration of `f`. The plaintext is
    /// zeroized when this returns.
    pub fn with_private_key<T>(
        &self,
        key_id: &KeyId,
        f: impl FnOnce(&[u8]) -> T,
    ) -> Result<T, KeyError> {
        let record = self
            .record(key_id)?
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_hex()))?;
        let secret = self.unseal(key_id, &record.encrypted_private_key)?;
        Ok(f(secret.as_slice()))
    }
}
