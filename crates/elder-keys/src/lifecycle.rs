use elder_core::{scheme_for, ElderId, KeyId, KeyRecord, KeyStatus, SignatureAlgorithm};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::KeyError;
use crate::keystore::{KeyIndexEntry, KeyStore, MasterKey};
use crate::storage::Storage;

/// Generates, rotates, expires and retires Elder keys on top of a
/// [`KeyStore`].
///
/// All mutations take the write lock, so writes to any one key are
/// serialized; lookups share the read lock. At most one `Active` record
/// exists per owner.
pub struct KeyLifecycleManager<S: Storage> {
    store: RwLock<KeyStore<S>>,
}

impl<S: Storage> KeyLifecycleManager<S> {
    pub fn new(storage: S, master: &MasterKey) -> Self {
        KeyLifecycleManager {
            store: RwLock::new(KeyStore::open(storage, master)),
        }
    }

    /// Generate the first (or next, after expiry/revocation) key for an owner
    pub async fn generate(
        &self,
        owner_id: &ElderId,
        algorithm: SignatureAlgorithm,
        lifetime_ms: u64,
        now: u64,
    ) -> Result<KeyRecord, KeyError> {
        let mut store = self.store.write().await;

        let lapsed = find_active(&store, owner_id)?;
        if let Some(active) = &lapsed {
            if !active.is_expired_at(now) {
                return Err(KeyError::ActiveKeyExists(owner_id.to_string()));
            }
        }

        let record = new_record(&store, owner_id, algorithm, lifetime_ms, now)?;
        commit_or_rollback(&mut store, |store| {
            if let Some(active) = lapsed {
                stage_transition(store, active, KeyStatus::Expired, now)?;
            }
            store.stage(&record)
        })?;

        info!(
            "Generated {} key {} for {}",
            record.algorithm, record.key_id, owner_id
        );
        Ok(record)
    }

    /// Atomically retire the owner's active key and issue a replacement with
    /// the same algorithm. The old key keeps verifying signatures made
    /// before `now`.
    pub async fn rotate(
        &self,
        owner_id: &ElderId,
        lifetime_ms: u64,
        now: u64,
    ) -> Result<KeyRecord, KeyError> {
        let mut store = self.store.write().await;

        let current = find_active(&store, owner_id)?
            .ok_or_else(|| KeyError::KeyNotFound(format!("no active key for {}", owner_id)))?;
        let old_id = current.key_id;
        let algorithm = current.algorithm;
        let retired_as = if current.is_expired_at(now) {
            KeyStatus::Expired
        } else {
            KeyStatus::Rotated
        };

        let record = new_record(&store, owner_id, algorithm, lifetime_ms, now)?;
        commit_or_rollback(&mut store, |store| {
            stage_transition(store, current, retired_as, now)?;
            store.stage(&record)
        })?;

        info!(
            "Rotated key for {}: {} ({}) -> {}",
            owner_id, old_id, retired_as, record.key_id
        );
        Ok(record)
    }

    /// Active keys whose expiry falls within `advance_notice_ms` of `now`.
    /// Pure query.
    pub async fn check_rotation_needed(
        &self,
        now: u64,
        advance_notice_ms: u64,
    ) -> Result<Vec<KeyId>, KeyError> {
        let store = self.store.read().await;
        let horizon = now.saturating_add(advance_notice_ms);
        Ok(store
            .list_index()?
            .into_iter()
            .filter(|entry| entry.status == KeyStatus::Active && entry.expires_at <= horizon)
            .map(|entry| entry.key_id)
            .collect())
    }

    /// Move every active or rotated key past its expiry to `Expired`
    pub async fn expire_due(&self, now: u64) -> Result<Vec<KeyId>, KeyError> {
        let mut store = self.store.write().await;
        let due: Vec<KeyIndexEntry> = store
            .list_index()?
            .into_iter()
            .filter(|entry| {
                matches!(entry.status, KeyStatus::Active | KeyStatus::Rotated)
                    && entry.is_expired_at(now)
            })
            .collect();
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<KeyId> = due.iter().map(|entry| entry.key_id).collect();
        commit_or_rollback(&mut store, |store| {
            for entry in due {
                stage_transition(store, entry, KeyStatus::Expired, now)?;
            }
            Ok(())
        })?;

        for id in &ids {
            info!("Key {} expired", id);
        }
        Ok(ids)
    }

    /// Record a revocation on the key record itself
    pub async fn mark_revoked(&self, key_id: &KeyId, at: u64) -> Result<KeyIndexEntry, KeyError> {
        let mut store = self.store.write().await;
        let entry = store
            .index(key_id)?
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_hex()))?;
        if entry.status == KeyStatus::Revoked {
            return Err(KeyError::AlreadyRevoked(*key_id));
        }

        let updated = commit_or_rollback(&mut store, |store| {
            stage_transition(store, entry, KeyStatus::Revoked, at)
        })?;
        info!("Key {} marked revoked", key_id);
        Ok(updated)
    }

    pub async fn get(&self, key_id: &KeyId) -> Result<KeyIndexEntry, KeyError> {
        self.store
            .read()
            .await
            .index(key_id)?
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_hex()))
    }

    /// Full record, private half still sealed
    pub async fn record(&self, key_id: &KeyId) -> Result<KeyRecord, KeyError> {
        self.store
            .read()
            .await
            .record(key_id)?
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_hex()))
    }

    pub async fn active_key(&self, owner_id: &ElderId) -> Result<KeyIndexEntry, KeyError> {
        let store = self.store.read().await;
        find_active(&store, owner_id)?
            .ok_or_else(|| KeyError::KeyNotFound(format!("no active key for {}", owner_id)))
    }

    /// Every key an owner has held, oldest first
    pub async fn keys_for_owner(&self, owner_id: &ElderId) -> Result<Vec<KeyIndexEntry>, KeyError> {
        let store = self.store.read().await;
        let mut keys: Vec<KeyIndexEntry> = store
            .list_index()?
            .into_iter()
            .filter(|entry| &entry.owner_id == owner_id)
            .collect();
        keys.sort_by_key(|entry| (entry.created_at, entry.key_id));
        Ok(keys)
    }

    pub async fn list(&self) -> Result<Vec<KeyIndexEntry>, KeyError> {
        self.store.read().await.list_index()
    }

    /// Run `f` with the decrypted private key of an active, unexpired key.
    ///
    /// The plaintext only lives for the duration of the call and is zeroized
    /// before this returns.
    pub async fn with_active_key<T>(
        &self,
        key_id: &KeyId,
        now: u64,
        f: impl FnOnce(&KeyIndexEntry, &[u8]) -> T,
    ) -> Result<T, KeyError> {
        let store = self.store.read().await;
        let entry = store
            .index(key_id)?
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_hex()))?;

        match entry.status {
            KeyStatus::Revoked => return Err(KeyError::KeyRevoked(*key_id)),
            KeyStatus::Expired => return Err(KeyError::KeyExpired(*key_id)),
            KeyStatus::Rotated => {
                return Err(KeyError::KeyNotActive {
                    key_id: *key_id,
                    status: entry.status,
                })
            }
            KeyStatus::Active => {}
        }
        if entry.is_expired_at(now) {
            return Err(KeyError::KeyExpired(*key_id));
        }

        debug!("Unsealing key {} for signing", key_id);
        store.with_private_key(key_id, |secret| f(&entry, secret))
    }
}

fn find_active<S: Storage>(
    store: &KeyStore<S>,
    owner_id: &ElderId,
) -> Result<Option<KeyIndexEntry>, KeyError> {
    Ok(store
        .list_index()?
        .into_iter()
        .find(|entry| entry.status == KeyStatus::Active && &entry.owner_id == owner_id))
}

fn new_record<S: Storage>(
    store: &KeyStore<S>,
    owner_id: &ElderId,
    algorithm: SignatureAlgorithm,
    lifetime_ms: u64,
    now: u64,
) -> Result<KeyRecord, KeyError> {
    if lifetime_ms == 0 {
        return Err(KeyError::InvalidLifetime);
    }

    let (secret, public_key) = scheme_for(algorithm).generate();
    let key_id = KeyId::derive(algorithm, &public_key);
    if store.index(&key_id)?.is_some() {
        return Err(KeyError::Storage(format!("key id collision: {}", key_id)));
    }

    Ok(KeyRecord {
        key_id,
        algorithm,
        public_key,
        encrypted_private_key: store.seal(&key_id, &secret)?,
        owner_id: owner_id.clone(),
        created_at: now,
        expires_at: now.saturating_add(lifetime_ms),
        rotated_at: None,
        revoked_at: None,
        status: KeyStatus::Active,
    })
}

fn stage_transition<S: Storage>(
    store: &mut KeyStore<S>,
    mut entry: KeyIndexEntry,
    to: KeyStatus,
    at: u64,
) -> Result<KeyIndexEntry, KeyError> {
    if !entry.status.can_transition_to(to) {
        return Err(KeyError::InvalidTransition {
            key_id: entry.key_id,
            from: entry.status,
            to,
        });
    }

    match to {
        KeyStatus::Rotated => entry.rotated_at = Some(at),
        KeyStatus::Revoked => entry.revoked_at = Some(at),
        KeyStatus::Expired | KeyStatus::Active => {}
    }
    debug!("Key {}: {} -> {}", entry.key_id, entry.status, to);
    entry.status = to;
    store.stage_index(&entry)?;
    Ok(entry)
}

/// Stage a batch and commit it, discarding the whole batch on any failure
fn commit_or_rollback<S: Storage, T>(
    store: &mut KeyStore<S>,
    stage: impl FnOnce(&mut KeyStore<S>) -> Result<T, KeyError>,
) -> Result<T, KeyError> {
    match stage(store).and_then(|value| store.commit().map(|_| value)) {
        Ok(value) => Ok(value),
        Err(e) => {
            store.rollback();
            Err(e)
        }
    }
}
