use crate::application::clock::{system_clock, NowProvider};
use crate::domain::models::RemoteDocument;
use crate::domain::normalize;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalRecord, LocalStore, ANONYMOUS_SCOPE};
use crate::infrastructure::remote_store::{DocumentPatch, RemoteDocumentStore};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// One queued remote write. `document` is the full state at the time of the
/// mutation and is only sent when the merge cannot be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    pub key: String,
    pub sequence: u64,
    pub patch: DocumentPatch,
    pub document: RemoteDocument,
}

/// Highest outbox sequence the remote writer is done with, shared between the
/// writer task and the persistence layer that queued the writes.
#[derive(Debug, Clone, Default)]
pub struct WriteAcks(Arc<AtomicU64>);

impl WriteAcks {
    pub fn acknowledge(&self, sequence: u64) {
        self.0.fetch_max(sequence, Ordering::SeqCst);
    }

    pub fn acknowledged(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the remote writes of the current scope go, and which of them the
/// writer has not finished yet.
struct Outbox {
    key: String,
    sender: mpsc::UnboundedSender<RemoteWrite>,
    acks: WriteAcks,
    next_sequence: u64,
    unacknowledged: Vec<(u64, DocumentPatch)>,
    confirmed_through: Option<DateTime<Utc>>,
}

impl Outbox {
    fn prune_acknowledged(&mut self) {
        let acknowledged = self.acks.acknowledged();
        let confirmed_through = &mut self.confirmed_through;
        self.unacknowledged.retain(|(sequence, patch)| {
            if *sequence > acknowledged {
                return true;
            }
            if confirmed_through.is_none_or(|stamp| stamp < patch.last_updated) {
                *confirmed_through = Some(patch.last_updated);
            }
            false
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Merged,
    Recreated,
}

/// Local-first persistence: every mutation lands in the local store
/// synchronously, then is queued for the remote writer when signed in.
pub struct PersistenceLayer {
    local: Arc<dyn LocalStore>,
    scope: String,
    outbox: Option<Outbox>,
}

impl PersistenceLayer {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self {
            local,
            scope: ANONYMOUS_SCOPE.to_string(),
            outbox: None,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Switches the local partition; the remote outbox is always detached.
    pub fn set_scope(&mut self, scope: impl Into<String>) {
        self.scope = scope.into();
        self.outbox = None;
    }

    /// Routes later writes to `key`. The returned acks must be handed to the
    /// `RemoteWriter` draining `sender`.
    pub fn connect_remote(
        &mut self,
        key: impl Into<String>,
        sender: mpsc::UnboundedSender<RemoteWrite>,
    ) -> WriteAcks {
        let acks = WriteAcks::default();
        self.outbox = Some(Outbox {
            key: key.into(),
            sender,
            acks: acks.clone(),
            next_sequence: 1,
            unacknowledged: Vec::new(),
            confirmed_through: None,
        });
        acks
    }

    pub fn disconnect_remote(&mut self) {
        self.outbox = None;
    }

    pub fn remote_key(&self) -> Option<&str> {
        self.outbox.as_ref().map(|outbox| outbox.key.as_str())
    }

    /// Lines a remote snapshot up with this device's own writes. Returns
    /// `None` for a snapshot older than a write the writer already finished;
    /// otherwise the writes still in flight are replayed on top of it.
    pub fn reconcile_snapshot(&mut self, mut snapshot: RemoteDocument) -> Option<RemoteDocument> {
        let Some(outbox) = self.outbox.as_mut() else {
            return Some(snapshot);
        };
        outbox.prune_acknowledged();
        if let (Some(snapshot_stamp), Some(confirmed)) =
            (snapshot.last_updated, outbox.confirmed_through)
        {
            if snapshot_stamp < confirmed {
                tracing::debug!(
                    key = %outbox.key,
                    snapshot = %snapshot_stamp,
                    confirmed = %confirmed,
                    "snapshot predates this device's writes"
                );
                return None;
            }
        }
        for (_, patch) in &outbox.unacknowledged {
            patch.apply_to(&mut snapshot);
        }
        Some(snapshot)
    }

    /// Reads and repairs the four records of the current scope.
    pub fn load_state(
        &self,
        now: DateTime<Utc>,
        recent_limit: usize,
    ) -> Result<RemoteDocument, InfraError> {
        let load = |record| -> Result<Value, InfraError> {
            Ok(self.local.load(&self.scope, record)?.unwrap_or(Value::Null))
        };
        Ok(RemoteDocument {
            settings: normalize::settings(&load(LocalRecord::Settings)?),
            log: normalize::log(&load(LocalRecord::Log)?, now),
            active_sessions: normalize::active_sessions(&load(LocalRecord::ActiveSessions)?, now),
            recent_projects: normalize::recent_projects(
                &load(LocalRecord::RecentProjects)?,
                recent_limit,
            ),
            last_updated: None,
        })
    }

    /// Writes `records` locally, then queues the same fields for the remote
    /// document. A local failure is returned after the remote write is queued.
    pub fn persist(
        &mut self,
        records: &[LocalRecord],
        state: &RemoteDocument,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut local_result = Ok(());
        for record in records {
            if let Err(error) = self.save_record(*record, state, now) {
                tracing::error!(
                    scope = %self.scope,
                    record = record.as_str(),
                    error = %error,
                    "local write failed"
                );
                local_result = Err(error);
            }
        }
        self.enqueue_remote(records, state, now);
        local_result
    }

    /// Writes `records` to the local store only.
    pub fn persist_local(
        &self,
        records: &[LocalRecord],
        state: &RemoteDocument,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        for record in records {
            self.save_record(*record, state, now)?;
        }
        Ok(())
    }

    /// Local-only write of every record, used when mirroring remote snapshots.
    pub fn mirror_all(&self, state: &RemoteDocument, now: DateTime<Utc>) -> Result<(), InfraError> {
        self.persist_local(&LocalRecord::ALL, state, now)
    }

    fn save_record(
        &self,
        record: LocalRecord,
        state: &RemoteDocument,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let payload = match record {
            LocalRecord::Settings => serde_json::to_value(state.settings)?,
            LocalRecord::Log => serde_json::to_value(&state.log)?,
            LocalRecord::ActiveSessions => serde_json::to_value(&state.active_sessions)?,
            LocalRecord::RecentProjects => serde_json::to_value(&state.recent_projects)?,
        };
        self.local.save(&self.scope, record, &payload, now)
    }

    fn enqueue_remote(
        &mut self,
        records: &[LocalRecord],
        state: &RemoteDocument,
        now: DateTime<Utc>,
    ) {
        let Some(outbox) = self.outbox.as_mut() else {
            return;
        };
        let mut patch = DocumentPatch::empty(now);
        for record in records {
            match record {
                LocalRecord::Settings => patch.settings = Some(state.settings),
                LocalRecord::Log => patch.log = Some(state.log.clone()),
                LocalRecord::ActiveSessions => {
                    patch.active_sessions = Some(state.active_sessions.clone())
                }
                LocalRecord::RecentProjects => {
                    patch.recent_projects = Some(state.recent_projects.clone())
                }
            }
        }
        let mut document = state.clone();
        document.last_updated = Some(now);
        let sequence = outbox.next_sequence;
        outbox.next_sequence += 1;
        let write = RemoteWrite {
            key: outbox.key.clone(),
            sequence,
            patch: patch.clone(),
            document,
        };
        if outbox.sender.send(write).is_err() {
            tracing::warn!(key = %outbox.key, "remote writer is gone; write kept locally only");
            return;
        }
        outbox.unacknowledged.push((sequence, patch));
    }
}

/// Drains the outbox in order. Writes are fire-and-forget from the engine's
/// point of view: failures are logged, never surfaced.
pub struct RemoteWriter {
    remote: Arc<dyn RemoteDocumentStore>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    acks: WriteAcks,
}

impl RemoteWriter {
    pub fn new(remote: Arc<dyn RemoteDocumentStore>) -> Self {
        Self {
            remote,
            retry_policy: RetryPolicy::default(),
            now_provider: system_clock(),
            acks: WriteAcks::default(),
        }
    }

    pub fn with_acks(mut self, acks: WriteAcks) -> Self {
        self.acks = acks;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn run(self, mut writes: mpsc::UnboundedReceiver<RemoteWrite>) {
        while let Some(write) = writes.recv().await {
            if let Err(error) = self.write(&write).await {
                tracing::warn!(key = %write.key, error = %error, "remote write dropped");
            }
            self.acks.acknowledge(write.sequence);
        }
        tracing::debug!("remote writer stopped");
    }

    /// Merges the patch; when that fails the full document is written instead
    /// so a missing or unreadable document heals itself.
    pub async fn write(&self, write: &RemoteWrite) -> Result<WriteOutcome, InfraError> {
        match self.with_retry(|| self.remote.merge_update(&write.key, &write.patch)).await {
            Ok(()) => Ok(WriteOutcome::Merged),
            Err(error) => {
                if matches!(error, InfraError::RemoteDocumentMissing(_)) {
                    tracing::info!(key = %write.key, "remote document missing; creating it");
                } else {
                    tracing::warn!(
                        key = %write.key,
                        error = %error,
                        "remote merge failed; overwriting document"
                    );
                }
                let mut document = write.document.clone();
                document.last_updated = Some((self.now_provider)());
                self.with_retry(|| self.remote.create_or_overwrite(&write.key, &document))
                    .await?;
                Ok(WriteOutcome::Recreated)
            }
        }
    }

    async fn with_retry<F, Fut>(&self, mut operation: F) -> Result<(), InfraError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(()) => return Ok(()),
                Err(error)
                    if error.is_transient()
                        && !matches!(error, InfraError::RemoteDocumentMissing(_))
                        && attempt + 1 < max_attempts =>
                {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(u32::from(attempt)));
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
