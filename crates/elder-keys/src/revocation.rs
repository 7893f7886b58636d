use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use elder_core::{serialize, KeyId, RevocationAuthorization, RevocationEntry, SigningIdentity};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::authority::RevocationAuthority;
use crate::error::KeyError;
use crate::export::SignedRevocationList;
use crate::storage::Storage;

const REVOCATION_PREFIX: &[u8] = b"rev:";

/// How long after issue an authorization is accepted, in ms
pub const DEFAULT_AUTHORIZATION_WINDOW_MS: u64 = 5 * 60 * 1000;

fn entry_key(sequence: u64) -> Vec<u8> {
    let mut key = REVOCATION_PREFIX.to_vec();
    key.extend_from_slice(format!("{:016x}", sequence).as_bytes());
    key
}

struct RevocationState<S> {
    storage: S,
    entries: Vec<RevocationEntry>,
    by_key: HashMap<KeyId, usize>,
}

/// Append-only record of revoked keys.
///
/// A key id appears at most once and entries are never mutated, so once
/// `revoke` returns, `is_revoked(key, t)` holds for every `t >= revoked_at`.
pub struct RevocationRegistry<S: Storage> {
    state: RwLock<RevocationState<S>>,
    authority: Arc<dyn RevocationAuthority>,
    authorization_window: u64,
}

impl<S: Storage> RevocationRegistry<S> {
    /// Open the registry, reloading persisted entries in sequence order
    pub fn open(storage: S, authority: Arc<dyn RevocationAuthority>) -> Result<Self, KeyError> {
        let mut entries = Vec::new();
        let mut by_key = HashMap::new();

        for (_, bytes) in storage.scan_prefix(REVOCATION_PREFIX) {
            let entry: RevocationEntry = serialize::from_bytes(&bytes)?;
            if entry.sequence != entries.len() as u64 {
                return Err(KeyError::Storage(format!(
                    "revocation log gap at sequence {}",
                    entries.len()
                )));
            }
            by_key.insert(entry.key_id, entries.len());
            entries.push(entry);
        }

        if !entries.is_empty() {
            info!("Loaded {} revocation entries", entries.len());
        }

        Ok(RevocationRegistry {
            state: RwLock::new(RevocationState {
                storage,
                entries,
                by_key,
            }),
            authority,
            authorization_window: DEFAULT_AUTHORIZATION_WINDOW_MS,
        })
    }

    /// Accept authorizations issued at most `window_ms` before the revocation
    pub fn with_authorization_window(mut self, window_ms: u64) -> Self {
        self.authorization_window = window_ms;
        self
    }

    pub fn authority_id(&self) -> String {
        self.authority.authority_id()
    }

    fn check_issue_time(&self, issued_at: u64, now: u64) -> Result<(), KeyError> {
        if issued_at > now {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "authorization issued at {} is in the future",
                issued_at
            )));
        }
        if now - issued_at > self.authorization_window {
            return Err(KeyError::UnauthorizedRevocation(format!(
                "authorization issued at {} has expired",
                issued_at
            )));
        }
        Ok(())
    }

    /// Revoke `key_id` effective at `now`. The authorization must have been
    /// issued within the authorization window before `now`.
    pub async fn revoke(
        &self,
        key_id: &KeyId,
        reason: &str,
        authorization: RevocationAuthorization,
        now: u64,
    ) -> Result<RevocationEntry, KeyError> {
        let mut state = self.state.write().await;

        if state.by_key.contains_key(key_id) {
            return Err(KeyError::AlreadyRevoked(*key_id));
        }
        if let Err(e) = self
            .check_issue_time(authorization.issued_at, now)
            .and_then(|_| self.authority.authorize(key_id, reason, &authorization))
        {
            warn!("Rejected revocation of {}: {}", key_id, e);
            return Err(e);
        }

        let entry = RevocationEntry {
            sequence: state.entries.len() as u64,
            key_id: *key_id,
            reason: reason.to_string(),
            revoked_by: self.authority.authority_id(),
            revoked_at: now,
            authorization,
        };

        let bytes = serialize::to_bytes(&entry)?;
        state.storage.put(&entry_key(entry.sequence), &bytes);
        if let Err(e) = state.storage.commit() {
            state.storage.rollback();
            return Err(e);
        }

        let index = state.entries.len();
        state.by_key.insert(*key_id, index);
        state.entries.push(entry.clone());

        info!(
            "Revoked key {} at {} by {}: {}",
            key_id, now, entry.revoked_by, reason
        );
        Ok(entry)
    }

    /// Non-retroactive: revoked at `at` iff an entry exists with
    /// `revoked_at <= at`
    pub async fn is_revoked(&self, key_id: &KeyId, at: u64) -> bool {
        let state = self.state.read().await;
        state
            .by_key
            .get(key_id)
            .is_some_and(|&i| state.entries[i].is_effective_at(at))
    }

    pub async fn revoked_at(&self, key_id: &KeyId) -> Option<u64> {
        let state = self.state.read().await;
        state.by_key.get(key_id).map(|&i| state.entries[i].revoked_at)
    }

    pub async fn get(&self, key_id: &KeyId) -> Option<RevocationEntry> {
        let state = self.state.read().await;
        state.by_key.get(key_id).map(|&i| state.entries[i].clone())
    }

    /// All entries in revocation order
    pub async fn entries(&self) -> Vec<RevocationEntry> {
        self.state.read().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// key id -> revoked_at, for snapshots
    pub async fn revocation_times(&self) -> BTreeMap<KeyId, u64> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|entry| (entry.key_id, entry.revoked_at))
            .collect()
    }

    /// Signed, publishable list of every revocation
    pub async fn export(
        &self,
        issuer: &SigningIdentity,
        issued_at: u64,
    ) -> Result<SignedRevocationList, KeyError> {
        let entries = self.entries().await;
        SignedRevocationList::sign(issuer, self.authority.authority_id(), &entries, issued_at)
    }
}
