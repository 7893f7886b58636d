use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use elder_core::{
    hash_blake3, CanonicalHeader, ElderId, Hash, IndividualSignature, QuorumSignature,
};
use elder_keys::{KeyRejection, RegistrySnapshot, RevocationRegistry, Storage};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::acceptance::check_signature;
use crate::error::QuorumError;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Length of each collection window
    pub collection_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            collection_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of handing one signature to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted; `signers` distinct Elders now counted
    Counted { signers: usize },
    /// This Elder was already counted
    Duplicate,
    /// Dropped; the session is unaffected
    Rejected { reason: String },
    /// The session is no longer collecting
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuorumStatus {
    Collecting { signers: usize, threshold: usize },
    Reached { signers: usize, threshold: usize },
    TimedOut { signers: usize, threshold: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Reached,
    TimedOut,
    Cancelled,
}

struct SessionState {
    phase: Phase,
    signers: HashSet<ElderId>,
    signatures: Vec<IndividualSignature>,
    result: Option<QuorumSignature>,
}

struct Session {
    id: SessionId,
    header: Vec<u8>,
    header_hash: Hash,
    height: u64,
    snapshot: Arc<RegistrySnapshot>,
    deadline: Instant,
    state: Mutex<SessionState>,
    notify: Notify,
}

impl Session {
    /// Close the window if the deadline passed. Caller holds the state lock.
    fn expire_if_due(&self, state: &mut SessionState) {
        if state.phase == Phase::Collecting && Instant::now() >= self.deadline {
            state.phase = Phase::TimedOut;
            warn!(
                "Session {} for header {} timed out with {}/{} signers",
                self.id,
                self.header_hash,
                state.signers.len(),
                self.snapshot.threshold
            );
            self.notify.notify_waiters();
        }
    }

    fn status(&self, state: &SessionState) -> QuorumStatus {
        let signers = state.signers.len();
        let threshold = self.snapshot.threshold;
        match state.phase {
            Phase::Collecting => QuorumStatus::Collecting { signers, threshold },
            Phase::Reached => QuorumStatus::Reached { signers, threshold },
            Phase::TimedOut | Phase::Cancelled => QuorumStatus::TimedOut { signers, threshold },
        }
    }
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, Arc<Session>>,
    by_header: HashMap<Hash, SessionId>,
    next_id: u64,
}

/// Collects Elder signatures per header and decides when a quorum is met.
///
/// Each session runs `Collecting -> Reached | TimedOut`. The per-Elder
/// dedup and the signer count are updated under the session lock, so two
/// concurrent submissions from one Elder can never both be counted. Once the
/// threshold is met the session freezes and the quorum signature holds
/// exactly `threshold` signers.
pub struct QuorumCoordinator<R: Storage> {
    config: CoordinatorConfig,
    revocations: Arc<RevocationRegistry<R>>,
    sessions: Mutex<Sessions>,
}

impl<R: Storage> QuorumCoordinator<R> {
    pub fn new(config: CoordinatorConfig, revocations: Arc<RevocationRegistry<R>>) -> Self {
        QuorumCoordinator {
            config,
            revocations,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Begin collecting signatures for `header_bytes` against a snapshot
    /// pinned at the header's height. Reopening a header that still has a
    /// live or finished session returns that session.
    pub async fn open(
        &self,
        header_bytes: &[u8],
        snapshot: Arc<RegistrySnapshot>,
    ) -> Result<SessionId, QuorumError> {
        let header = CanonicalHeader::from_canonical_bytes(header_bytes)?;
        if snapshot.height != header.index {
            return Err(QuorumError::SnapshotHeightMismatch {
                header: header.index,
                snapshot: snapshot.height,
            });
        }
        let header_hash = hash_blake3(header_bytes);

        let mut sessions = self.sessions.lock().await;
        if let Some(id) = sessions.by_header.get(&header_hash).copied() {
            let reusable = match sessions.by_id.get(&id) {
                Some(session) => {
                    let mut state = session.state.lock().await;
                    session.expire_if_due(&mut state);
                    state.phase != Phase::TimedOut
                }
                None => false,
            };
            if reusable {
                return Ok(id);
            }
            sessions.by_id.remove(&id);
            sessions.by_header.remove(&header_hash);
        }

        let id = SessionId(sessions.next_id);
        sessions.next_id += 1;
        let session = Arc::new(Session {
            id,
            header: header_bytes.to_vec(),
            header_hash,
            height: header.index,
            snapshot: snapshot.clone(),
            deadline: Instant::now() + self.config.collection_timeout,
            state: Mutex::new(SessionState {
                phase: Phase::Collecting,
                signers: HashSet::new(),
                signatures: Vec::new(),
                result: None,
            }),
            notify: Notify::new(),
        });
        sessions.by_id.insert(id, session);
        sessions.by_header.insert(header_hash, id);

        info!(
            "Opened session {} for header {} at height {} ({} of {})",
            id, header_hash, header.index, snapshot.threshold, snapshot.total_enrolled
        );
        Ok(id)
    }

    async fn session(&self, id: SessionId) -> Result<Arc<Session>, QuorumError> {
        self.sessions
            .lock()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or(QuorumError::SessionNotFound(id.0))
    }

    /// Session collecting for a header, if any
    pub async fn session_for(&self, header_hash: &Hash) -> Option<SessionId> {
        self.sessions.lock().await.by_header.get(header_hash).copied()
    }

    /// Validate and count one signature. Invalid or duplicate signatures are
    /// dropped without affecting the session.
    pub async fn submit(
        &self,
        id: SessionId,
        signature: IndividualSignature,
    ) -> Result<SubmitOutcome, QuorumError> {
        let session = self.session(id).await?;

        {
            let mut state = session.state.lock().await;
            session.expire_if_due(&mut state);
            if state.phase != Phase::Collecting {
                return Ok(SubmitOutcome::Closed);
            }
            if state.signers.contains(&signature.elder_id) {
                return Ok(SubmitOutcome::Duplicate);
            }
        }

        if let Err(e) = self.validate(&session, &signature).await {
            debug!(
                "Session {}: dropped signature from {}: {}",
                id, signature.elder_id, e
            );
            return Ok(SubmitOutcome::Rejected {
                reason: e.to_string(),
            });
        }

        let mut state = session.state.lock().await;
        session.expire_if_due(&mut state);
        if state.phase != Phase::Collecting {
            return Ok(SubmitOutcome::Closed);
        }
        // Check-and-insert under the lock
        if !state.signers.insert(signature.elder_id.clone()) {
            return Ok(SubmitOutcome::Duplicate);
        }
        debug!(
            "Session {}: counted {} ({}/{})",
            id,
            signature.elder_id,
            state.signers.len(),
            session.snapshot.threshold
        );
        state.signatures.push(signature);

        let signers = state.signers.len();
        if signers >= session.snapshot.threshold {
            state.phase = Phase::Reached;
            state.result = Some(QuorumSignature {
                height: session.height,
                header: session.header.clone(),
                header_hash: session.header_hash,
                signatures: state.signatures.clone(),
                threshold: session.snapshot.threshold,
                total_enrolled: session.snapshot.total_enrolled,
                is_valid: true,
            });
            info!(
                "Quorum reached for header {} at height {}: {}/{}",
                session.header_hash, session.height, signers, session.snapshot.total_enrolled
            );
            session.notify.notify_waiters();
        }

        Ok(SubmitOutcome::Counted { signers })
    }

    async fn validate(
        &self,
        session: &Session,
        signature: &IndividualSignature,
    ) -> Result<(), QuorumError> {
        check_signature(&session.snapshot, &session.header_hash, signature)?;
        // Revocations recorded after the snapshot was pinned
        if self
            .revocations
            .is_revoked(&signature.key_id, signature.signed_at)
            .await
        {
            return Err(KeyRejection::Revoked(signature.key_id).into());
        }
        Ok(())
    }

    /// Wait until the session reaches quorum or its window elapses
    pub async fn evaluate(&self, id: SessionId) -> Result<QuorumSignature, QuorumError> {
        let session = self.session(id).await?;

        loop {
            let state = session.state.lock().await;
            if let Some(result) = &state.result {
                return Ok(result.clone());
            }
            match state.phase {
                Phase::Collecting => {}
                Phase::TimedOut => {
                    return Err(QuorumError::QuorumNotReached {
                        have: state.signers.len(),
                        need: session.snapshot.threshold,
                    })
                }
                Phase::Cancelled | Phase::Reached => return Err(QuorumError::SessionClosed(id.0)),
            }

            // Registered before the lock is released, so no wakeup is lost
            let notified = session.notify.notified();
            drop(state);

            if timeout_at(session.deadline, notified).await.is_err() {
                let mut state = session.state.lock().await;
                session.expire_if_due(&mut state);
            }
        }
    }

    /// Non-blocking status of a session
    pub async fn status(&self, id: SessionId) -> Result<QuorumStatus, QuorumError> {
        let session = self.session(id).await?;
        let mut state = session.state.lock().await;
        session.expire_if_due(&mut state);
        Ok(session.status(&state))
    }

    /// Abandon a session and release its state
    pub async fn cancel(&self, id: SessionId) -> Result<(), QuorumError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .by_id
                .remove(&id)
                .ok_or(QuorumError::SessionNotFound(id.0))?;
            sessions.by_header.remove(&session.header_hash);
            session
        };

        let mut state = session.state.lock().await;
        if state.phase == Phase::Collecting {
            state.phase = Phase::Cancelled;
        }
        session.notify.notify_waiters();
        info!("Cancelled session {} for header {}", id, session.header_hash);
        Ok(())
    }

    /// Drop every session that is no longer collecting
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut finished = Vec::new();
        for (id, session) in &sessions.by_id {
            let mut state = session.state.lock().await;
            session.expire_if_due(&mut state);
            if state.phase != Phase::Collecting {
                finished.push((*id, session.header_hash));
            }
        }
        for (id, header_hash) in &finished {
            sessions.by_id.remove(id);
            sessions.by_header.remove(header_hash);
        }
        if !finished.is_empty() {
            debug!("Pruned {} finished sessions", finished.len());
        }
        finished.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.by_id.len()
    }
}
