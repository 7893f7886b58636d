use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use elder_core::{
    hash_blake3, serialize, CanonicalHeader, CoreError, ElderId, IndividualSignature, KeyId,
    KeyRecord, KeyStatus, QuorumSignature, RevocationAuthorization, RevocationEntry,
    SigningIdentity,
};
use elder_keys::{
    DesignatedAuthority, ElderQuorumAuthority, ElderRegistry, FileStorage, KeyError,
    KeyLifecycleManager, MasterKey, RegistrySnapshot, RevocationAuthority, RevocationRegistry,
    SignedRevocationList, Storage,
};
use elder_quorum::{
    verify_quorum, AuditSink, CoordinatorConfig, JsonlAuditLog, QuorumCoordinator, QuorumStatus,
    SessionId, Signer, SubmitOutcome, Verification,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{AuthorityConfig, NodeConfig};
use crate::error::ServiceError;

/// Source of "now" in unix milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Storage and side channels the service runs on
pub struct Backends<S> {
    pub key_storage: S,
    pub revocation_storage: S,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
    /// Where pinned snapshots are persisted; memory only when `None`
    pub snapshot_dir: Option<PathBuf>,
}

/// The operations exposed to the API and CLI layer.
///
/// This is the only place that reads the clock. Snapshots are pinned per
/// height on first use and never replaced, so later changes to the Elder set
/// or key state cannot alter how a past height verifies.
pub struct ElderService<S: Storage> {
    config: NodeConfig,
    registry: ElderRegistry,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<KeyLifecycleManager<S>>,
    revocations: Arc<RevocationRegistry<S>>,
    quorum_authority: Option<Arc<ElderQuorumAuthority>>,
    signer: Signer<S, S>,
    coordinator: QuorumCoordinator<S>,
    pinned: RwLock<BTreeMap<u64, Arc<RegistrySnapshot>>>,
    snapshot_dir: Option<PathBuf>,
}

impl ElderService<FileStorage> {
    /// Open the service on the node's data directory
    pub async fn open(config: NodeConfig, master: &MasterKey) -> Result<Self, ServiceError> {
        let backends = Backends {
            key_storage: FileStorage::new(config.key_store_path())?,
            revocation_storage: FileStorage::new(config.revocations_path())?,
            audit: Arc::new(JsonlAuditLog::open(config.audit_log_path())?),
            clock: Arc::new(SystemClock),
            snapshot_dir: Some(config.snapshot_dir()),
        };
        Self::new(config, master, backends).await
    }
}

impl<S: Storage> ElderService<S> {
    pub async fn new(
        config: NodeConfig,
        master: &MasterKey,
        backends: Backends<S>,
    ) -> Result<Self, ServiceError> {
        let registry = ElderRegistry::new(config.elders.iter().cloned());

        let mut quorum_authority = None;
        let authority: Arc<dyn RevocationAuthority> = match &config.revocation_authority {
            AuthorityConfig::Designated {
                name,
                algorithm,
                public_key,
            } => {
                let public_key = hex::decode(public_key).map_err(CoreError::from)?;
                Arc::new(DesignatedAuthority::from_public_key(
                    name.clone(),
                    *algorithm,
                    public_key,
                ))
            }
            AuthorityConfig::ElderQuorum => {
                let authority = Arc::new(ElderQuorumAuthority::pending());
                quorum_authority = Some(authority.clone());
                authority
            }
        };

        let lifecycle = Arc::new(KeyLifecycleManager::new(backends.key_storage, master));
        let revocations = Arc::new(
            RevocationRegistry::open(backends.revocation_storage, authority)?
                .with_authorization_window(config.revocation_window_ms),
        );
        let signer = Signer::new(lifecycle.clone(), revocations.clone(), backends.audit);
        let coordinator = QuorumCoordinator::new(
            CoordinatorConfig {
                collection_timeout: config.collection_timeout(),
            },
            revocations.clone(),
        );

        let service = ElderService {
            config,
            registry,
            clock: backends.clock,
            lifecycle,
            revocations,
            quorum_authority,
            signer,
            coordinator,
            pinned: RwLock::new(BTreeMap::new()),
            snapshot_dir: backends.snapshot_dir,
        };
        service.reconcile_revocations().await?;
        service.refresh_authority().await?;

        info!(
            "Elder service ready: {} elders, threshold {:?}, revocations by {}",
            service.registry.len(),
            service.config.threshold,
            service.revocations.authority_id()
        );
        Ok(service)
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ElderRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &KeyLifecycleManager<S> {
        &self.lifecycle
    }

    pub fn revocations(&self) -> &RevocationRegistry<S> {
        &self.revocations
    }

    fn ensure_elder(&self, elder_id: &ElderId) -> Result<(), ServiceError> {
        if !self.registry.contains(elder_id) {
            return Err(ServiceError::UnknownElder(elder_id.to_string()));
        }
        Ok(())
    }

    /// Keep an elder-quorum revocation authority in step with key state
    async fn refresh_authority(&self) -> Result<(), ServiceError> {
        if let Some(authority) = &self.quorum_authority {
            let snapshot = RegistrySnapshot::capture(
                u64::MAX,
                &self.registry,
                &*self.lifecycle,
                &*self.revocations,
                self.config.threshold,
            )
            .await?;
            authority.replace_snapshot(snapshot);
        }
        Ok(())
    }

    /// Mark every key with a revocation entry as revoked on its record. A
    /// revocation is committed before the key record is updated, so a crash
    /// in between leaves the record behind until this runs.
    pub async fn reconcile_revocations(&self) -> Result<usize, ServiceError> {
        let mut fixed = 0;
        for entry in self.revocations.entries().await {
            let record = match self.lifecycle.get(&entry.key_id).await {
                Ok(record) => record,
                Err(KeyError::KeyNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if record.status == KeyStatus::Revoked {
                continue;
            }
            self.lifecycle
                .mark_revoked(&entry.key_id, entry.revoked_at)
                .await?;
            fixed += 1;
        }
        if fixed > 0 {
            warn!("Marked {} revoked keys left unmarked", fixed);
        }
        Ok(fixed)
    }

    /// Generate the first key for an enrolled Elder
    pub async fn enroll_key(&self, owner: &ElderId) -> Result<KeyRecord, ServiceError> {
        self.ensure_elder(owner)?;
        let record = self
            .lifecycle
            .generate(
                owner,
                self.config.algorithm,
                self.config.key_lifetime_ms,
                self.now(),
            )
            .await?;
        self.refresh_authority().await?;
        Ok(record)
    }

    pub async fn rotate_key(&self, owner: &ElderId) -> Result<KeyRecord, ServiceError> {
        self.ensure_elder(owner)?;
        let record = self
            .lifecycle
            .rotate(owner, self.config.key_lifetime_ms, self.now())
            .await?;
        self.refresh_authority().await?;
        Ok(record)
    }

    /// Revoke a key, effective now
    pub async fn revoke_key(
        &self,
        key_id: &KeyId,
        reason: &str,
        authorization: RevocationAuthorization,
    ) -> Result<RevocationEntry, ServiceError> {
        self.lifecycle.get(key_id).await?;
        let now = self.now();
        let entry = match self
            .revocations
            .revoke(key_id, reason, authorization, now)
            .await
        {
            Ok(entry) => entry,
            Err(KeyError::AlreadyRevoked(_)) => {
                // Finish an earlier revocation whose record update failed
                self.reconcile_revocations().await?;
                self.refresh_authority().await?;
                return Err(KeyError::AlreadyRevoked(*key_id).into());
            }
            Err(e) => return Err(e.into()),
        };
        match self.lifecycle.mark_revoked(key_id, now).await {
            Ok(_) | Err(KeyError::AlreadyRevoked(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.refresh_authority().await?;
        Ok(entry)
    }

    /// Add an Elder's co-signature to a revocation request
    pub async fn cosign_revocation(
        &self,
        elder_id: &ElderId,
        key_id: &KeyId,
        reason: &str,
        authorization: &mut RevocationAuthorization,
    ) -> Result<(), ServiceError> {
        if self.quorum_authority.is_none() {
            return Err(ServiceError::NotElderQuorum);
        }
        self.ensure_elder(elder_id)?;
        self.signer
            .cosign_revocation(elder_id, key_id, reason, authorization, self.now())
            .await?;
        Ok(())
    }

    /// Active keys expiring within the configured notice window
    pub async fn rotation_due(&self) -> Result<Vec<KeyId>, ServiceError> {
        Ok(self
            .lifecycle
            .check_rotation_needed(self.now(), self.config.rotation_notice_ms)
            .await?)
    }

    pub async fn expire_due(&self) -> Result<Vec<KeyId>, ServiceError> {
        let expired = self.lifecycle.expire_due(self.now()).await?;
        if !expired.is_empty() {
            self.refresh_authority().await?;
        }
        Ok(expired)
    }

    /// Signed list of every revocation, issued by `issuer`.
    ///
    /// Under a designated authority `issuer` must be that authority. Under an
    /// elder quorum the list must also be endorsed by `endorsers`, at least a
    /// threshold of whom must hold usable keys.
    pub async fn export_revocations(
        &self,
        issuer: &SigningIdentity,
        endorsers: &[ElderId],
    ) -> Result<SignedRevocationList, ServiceError> {
        let now = self.now();
        match &self.config.revocation_authority {
            AuthorityConfig::Designated { public_key, .. } => {
                if hex::encode(issuer.public_key()) != *public_key {
                    return Err(KeyError::UnauthorizedRevocation(
                        "export must be signed by the designated authority".to_string(),
                    )
                    .into());
                }
                Ok(self.revocations.export(issuer, now).await?)
            }
            AuthorityConfig::ElderQuorum => {
                let mut list = self.revocations.export(issuer, now).await?;
                for elder_id in endorsers {
                    self.ensure_elder(elder_id)?;
                    self.signer
                        .endorse_revocation_list(elder_id, &mut list, now)
                        .await?;
                }
                let snapshot = self
                    .quorum_authority
                    .as_ref()
                    .and_then(|authority| authority.snapshot())
                    .ok_or(ServiceError::NotElderQuorum)?;
                list.verify_endorsed(&snapshot)?;
                Ok(list)
            }
        }
    }

    /// Sign a header with the Elder's active key
    pub async fn sign_block(
        &self,
        header: &[u8],
        elder_id: &ElderId,
    ) -> Result<IndividualSignature, ServiceError> {
        self.ensure_elder(elder_id)?;
        Ok(self.signer.sign_as(elder_id, header, self.now()).await?)
    }

    /// Pin (or fetch the already pinned) snapshot for `height`
    pub async fn pin_snapshot(&self, height: u64) -> Result<Arc<RegistrySnapshot>, ServiceError> {
        if let Some(snapshot) = self.pinned.read().await.get(&height) {
            return Ok(snapshot.clone());
        }

        let mut pinned = self.pinned.write().await;
        if let Some(snapshot) = pinned.get(&height) {
            return Ok(snapshot.clone());
        }
        if let Some(snapshot) = self.load_pinned(height)? {
            let snapshot = Arc::new(snapshot);
            pinned.insert(height, snapshot.clone());
            return Ok(snapshot);
        }

        let snapshot = RegistrySnapshot::capture(
            height,
            &self.registry,
            &*self.lifecycle,
            &*self.revocations,
            self.config.threshold,
        )
        .await?;
        self.store_pinned(&snapshot)?;
        let snapshot = Arc::new(snapshot);
        pinned.insert(height, snapshot.clone());

        info!(
            "Pinned snapshot at height {}: {} of {}",
            height, snapshot.threshold, snapshot.total_enrolled
        );
        Ok(snapshot)
    }

    /// Previously pinned snapshot for `height`
    pub async fn snapshot(&self, height: u64) -> Result<Arc<RegistrySnapshot>, ServiceError> {
        if let Some(snapshot) = self.pinned.read().await.get(&height) {
            return Ok(snapshot.clone());
        }
        match self.load_pinned(height)? {
            Some(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.pinned.write().await.insert(height, snapshot.clone());
                Ok(snapshot)
            }
            None => Err(ServiceError::NoSnapshot(height)),
        }
    }

    fn snapshot_path(&self, height: u64) -> Option<PathBuf> {
        self.snapshot_dir
            .as_ref()
            .map(|dir| dir.join(format!("{:020}.json", height)))
    }

    fn load_pinned(&self, height: u64) -> Result<Option<RegistrySnapshot>, ServiceError> {
        let Some(path) = self.snapshot_path(height) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .map_err(|e| ServiceError::SnapshotStore(e.to_string()))?;
        debug!("Loaded pinned snapshot from {:?}", path);
        Ok(Some(serialize::from_json(&json)?))
    }

    fn store_pinned(&self, snapshot: &RegistrySnapshot) -> Result<(), ServiceError> {
        let Some(path) = self.snapshot_path(snapshot.height) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::SnapshotStore(e.to_string()))?;
        }
        let json = serialize::to_json_pretty(snapshot)?;
        std::fs::write(&path, json).map_err(|e| ServiceError::SnapshotStore(e.to_string()))
    }

    /// Start collecting signatures for a header
    pub async fn open_round(&self, header: &[u8]) -> Result<SessionId, ServiceError> {
        let decoded = CanonicalHeader::from_canonical_bytes(header)?;
        let snapshot = self.pin_snapshot(decoded.index).await?;
        Ok(self.coordinator.open(header, snapshot).await?)
    }

    async fn round_for(&self, header: &[u8]) -> Result<SessionId, ServiceError> {
        let header_hash = hash_blake3(header);
        self.coordinator
            .session_for(&header_hash)
            .await
            .ok_or_else(|| ServiceError::NoRound(header_hash.to_hex()))
    }

    /// Hand a transport-delivered signature to the header's round. Only
    /// rounds opened locally with [`ElderService::open_round`] accept
    /// signatures, so a peer cannot pin a snapshot for a height.
    pub async fn submit_signature(
        &self,
        header: &[u8],
        signature: IndividualSignature,
    ) -> Result<SubmitOutcome, ServiceError> {
        let session = self.round_for(header).await?;
        Ok(self.coordinator.submit(session, signature).await?)
    }

    pub async fn quorum_status(&self, header: &[u8]) -> Result<QuorumStatus, ServiceError> {
        let session = self.round_for(header).await?;
        Ok(self.coordinator.status(session).await?)
    }

    /// Wait for the header's round to reach quorum or time out
    pub async fn finalize(&self, header: &[u8]) -> Result<QuorumSignature, ServiceError> {
        let session = self.round_for(header).await?;
        Ok(self.coordinator.evaluate(session).await?)
    }

    /// Drop finished rounds
    pub async fn prune_rounds(&self) -> usize {
        self.coordinator.prune().await
    }

    /// Verify a quorum signature against the snapshot pinned for `height`
    pub async fn verify_block(
        &self,
        header: &[u8],
        quorum: &QuorumSignature,
        height: u64,
    ) -> Result<Verification, ServiceError> {
        let snapshot = self.snapshot(height).await?;
        Ok(verify_quorum(header, quorum, &snapshot))
    }
}
