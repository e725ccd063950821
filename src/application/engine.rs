use crate::application::clock::NowProvider;
use crate::application::sync::{PersistenceLayer, RemoteWrite, WriteAcks};
use crate::application::tick_scheduler::{TickScheduler, TimerDriver};
use crate::application::undo_delete::{PendingDeletion, UndoDeleteManager};
use crate::domain::interval;
use crate::domain::models::{
    log_entry_id, logged_duration_minutes, AccountState, ActiveSession, IntervalKind, LogEntry,
    RemoteDocument, Settings, Task, MANUAL_SOURCE,
};
use crate::domain::recent_projects;
use crate::domain::retention::RetentionPolicy;
use crate::domain::stats::LogStats;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalRecord, LocalStore, ANONYMOUS_SCOPE};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Work intervals shorter than this need an explicit decision before logging.
pub const CONFIRMATION_THRESHOLD_SECONDS: u64 = 60;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str, now: DateTime<Utc>) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", now.timestamp_micros())
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::from(u32::try_from(value).unwrap_or(u32::MAX)))
}

fn sync_work_elapsed(session: &mut ActiveSession, now: DateTime<Utc>) {
    if session.is_running && session.is_working() {
        if let Some(anchor) = session.work_interval_start_timestamp {
            session.elapsed_or_remaining_seconds = interval::elapsed_since(anchor, now);
        }
    }
}

/// Local partition for a signed-in account, kept apart from the anonymous one.
pub fn account_scope(account_id: &str) -> String {
    format!("account:{}", account_id.trim())
}

fn normalized_label(label: &str, field_name: &str) -> Result<String, InfraError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(InfraError::invalid_input(format!("{field_name} must not be empty")));
    }
    Ok(label.to_string())
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    End,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    Log,
    Discard,
}

/// Short work interval frozen until the caller decides whether to log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub session_id: String,
    pub kind: CompletionKind,
    pub elapsed_seconds: u64,
    pub ended_at: DateTime<Utc>,
    was_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Logged {
        entry: LogEntry,
        /// Break earned by ending the interval; `None` when the session was removed.
        next_break: Option<IntervalKind>,
    },
    ConfirmationRequired(PendingConfirmation),
    NothingLogged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualEntry {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub project_label: Option<String>,
    pub summary: Option<String>,
    /// Must be set to log an entry shorter than a minute.
    pub confirm_short: bool,
}

/// Fields to replace on an existing log entry. An empty label or summary
/// clears the field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEntryEdit {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub project_label: Option<String>,
    pub summary: Option<String>,
}

/// Everything an observer needs to render the current state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineView {
    pub account: AccountState,
    pub settings: Settings,
    pub sessions: Vec<ActiveSession>,
    pub displayed_log: Vec<LogEntry>,
    pub history_exceeds_free_limit: bool,
    pub recent_projects: Vec<String>,
    pub pending_deletion: Option<String>,
    pub pending_confirmations: Vec<PendingConfirmation>,
    pub ticker_active: bool,
}

pub struct Engine {
    config: EngineConfig,
    retention: RetentionPolicy,
    now_provider: NowProvider,
    account: AccountState,
    settings: Settings,
    sessions: HashMap<String, ActiveSession>,
    session_order: Vec<String>,
    full_log: Vec<LogEntry>,
    recent_projects: Vec<String>,
    pending_confirmations: HashMap<String, PendingConfirmation>,
    undo: UndoDeleteManager,
    ticker: TickScheduler,
    timers: Box<dyn TimerDriver>,
    persistence: PersistenceLayer,
    view_tx: watch::Sender<EngineView>,
}

impl Engine {
    /// Loads the anonymous scope from `local` and resumes any running sessions.
    pub fn new(
        config: EngineConfig,
        local: Arc<dyn LocalStore>,
        timers: Box<dyn TimerDriver>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let (view_tx, _) = watch::channel(EngineView::default());
        let mut engine = Self {
            retention: config.retention_policy(),
            config,
            now_provider,
            account: AccountState::anonymous(),
            settings: Settings::default(),
            sessions: HashMap::new(),
            session_order: Vec::new(),
            full_log: Vec::new(),
            recent_projects: Vec::new(),
            pending_confirmations: HashMap::new(),
            undo: UndoDeleteManager::default(),
            ticker: TickScheduler::default(),
            timers,
            persistence: PersistenceLayer::new(local),
            view_tx,
        };
        let now = engine.now();
        let state = engine
            .persistence
            .load_state(now, engine.config.recent_projects_limit)?;
        engine.replace_state(state, now);
        tracing::info!(
            sessions = engine.session_order.len(),
            log_entries = engine.full_log.len(),
            "engine loaded local state"
        );
        engine.reconcile_ticker();
        engine.publish();
        Ok(engine)
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> EngineView {
        let now = self.now();
        let retention = self
            .retention
            .evaluate(&self.full_log, self.account.is_premium, now);
        let mut pending_confirmations = self
            .session_order
            .iter()
            .filter_map(|id| self.pending_confirmations.get(id).cloned())
            .collect::<Vec<_>>();
        pending_confirmations.sort_by_key(|confirmation| confirmation.ended_at);
        EngineView {
            account: self.account.clone(),
            settings: self.settings,
            sessions: self.ordered_sessions(),
            displayed_log: retention.displayed,
            history_exceeds_free_limit: retention.history_exceeds_free_limit,
            recent_projects: self.recent_projects.clone(),
            pending_deletion: self.undo.pending_id().map(ToOwned::to_owned),
            pending_confirmations,
            ticker_active: self.ticker.is_active(),
        }
    }

    pub fn session(&self, session_id: &str) -> Option<&ActiveSession> {
        self.sessions.get(session_id)
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    /// Totals over the log visible to the current tier.
    pub fn log_stats(&self) -> LogStats {
        let displayed = self
            .retention
            .displayed_log(&self.full_log, self.account.is_premium, self.now());
        LogStats::from_entries(&displayed)
    }

    /// Full state shaped as the remote document.
    pub fn document(&self) -> RemoteDocument {
        RemoteDocument {
            settings: self.settings,
            log: self.full_log.clone(),
            active_sessions: self.ordered_sessions(),
            recent_projects: self.recent_projects.clone(),
            last_updated: None,
        }
    }

    pub fn add_session(&mut self, project_label: &str) -> Result<ActiveSession, InfraError> {
        let label = normalized_label(project_label, "project label")?;
        let now = self.now();
        let session = ActiveSession::new(next_id("session", now), label);
        self.session_order.push(session.id.clone());
        self.sessions.insert(session.id.clone(), session.clone());
        tracing::info!(session_id = %session.id, "session added");
        self.commit(&[LocalRecord::ActiveSessions])?;
        Ok(session)
    }

    pub fn rename_session(
        &mut self,
        session_id: &str,
        project_label: &str,
    ) -> Result<ActiveSession, InfraError> {
        let label = normalized_label(project_label, "project label")?;
        let session = self.session_mut(session_id)?;
        session.project_label = label;
        let session = session.clone();
        self.commit(&[LocalRecord::ActiveSessions])?;
        Ok(session)
    }

    pub fn start(&mut self, session_id: &str) -> Result<(), InfraError> {
        self.ensure_not_awaiting(session_id)?;
        let now = self.now();
        let session = self.session_mut(session_id)?;
        if session.is_running {
            return Ok(());
        }
        if session.is_working() {
            session.work_interval_start_timestamp =
                Some(now - seconds(session.elapsed_or_remaining_seconds));
        }
        session.is_running = true;
        tracing::info!(session_id, interval = session.interval_kind.as_str(), "session started");
        self.commit(&[LocalRecord::ActiveSessions])
    }

    pub fn pause(&mut self, session_id: &str) -> Result<(), InfraError> {
        self.ensure_not_awaiting(session_id)?;
        let now = self.now();
        let session = self.session_mut(session_id)?;
        if !session.is_running {
            return Ok(());
        }
        sync_work_elapsed(session, now);
        session.is_running = false;
        tracing::info!(session_id, "session paused");
        self.commit(&[LocalRecord::ActiveSessions])
    }

    /// Ends the current work interval. Intervals of at least a minute are
    /// logged at once; shorter ones wait for `resolve_pending`.
    pub fn end_work_interval(&mut self, session_id: &str) -> Result<CompletionOutcome, InfraError> {
        self.complete(session_id, CompletionKind::End)
    }

    pub fn remove_session(&mut self, session_id: &str) -> Result<CompletionOutcome, InfraError> {
        self.complete(session_id, CompletionKind::Remove)
    }

    pub fn resolve_pending(
        &mut self,
        session_id: &str,
        decision: LogDecision,
    ) -> Result<CompletionOutcome, InfraError> {
        let confirmation = self.take_confirmation(session_id)?;
        tracing::info!(session_id, ?decision, "short interval resolved");
        match decision {
            LogDecision::Log => self.finish_with_log(
                session_id,
                confirmation.kind,
                confirmation.elapsed_seconds,
                confirmation.ended_at,
            ),
            LogDecision::Discard => self.finish_without_log(session_id, confirmation.kind),
        }
    }

    /// Abandons the end or remove request and resumes the session as it was.
    pub fn cancel_pending(&mut self, session_id: &str) -> Result<(), InfraError> {
        let confirmation = self.take_confirmation(session_id)?;
        let now = self.now();
        let session = self.session_mut(session_id)?;
        session.is_running = confirmation.was_running;
        sync_work_elapsed(session, now);
        self.reconcile_ticker();
        self.publish();
        Ok(())
    }

    pub fn edit_start_time(
        &mut self,
        session_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        self.ensure_not_awaiting(session_id)?;
        let now = self.now();
        if start_time > now {
            return Err(InfraError::invalid_input("start time must not be in the future"));
        }
        let session = self.session_mut(session_id)?;
        if !session.is_working() {
            return Err(InfraError::invalid_input("only work intervals have a start time"));
        }
        session.work_interval_start_timestamp = Some(start_time);
        session.elapsed_or_remaining_seconds = interval::elapsed_since(start_time, now);
        self.commit(&[LocalRecord::ActiveSessions])
    }

    /// Starts the break earned by the last completed work interval.
    pub fn take_break(&mut self, session_id: &str) -> Result<IntervalKind, InfraError> {
        self.ensure_not_awaiting(session_id)?;
        let settings = self.settings;
        let session = self.session_mut(session_id)?;
        let idle_work = session.is_working()
            && !session.is_running
            && session.elapsed_or_remaining_seconds == 0;
        if !idle_work || session.completed_work_intervals_in_set == 0 {
            return Err(InfraError::invalid_input("no break has been earned"));
        }
        let kind = interval::next_break_kind(session.completed_work_intervals_in_set, &settings);
        interval::begin_break(session, kind, &settings);
        tracing::info!(session_id, interval = kind.as_str(), "break started");
        self.commit(&[LocalRecord::ActiveSessions])?;
        Ok(kind)
    }

    pub fn skip_break(&mut self, session_id: &str) -> Result<(), InfraError> {
        let session = self.session_mut(session_id)?;
        if !session.interval_kind.is_break() {
            return Err(InfraError::invalid_input("session is not on a break"));
        }
        interval::finish_break(session);
        tracing::info!(session_id, "break skipped");
        self.commit(&[LocalRecord::ActiveSessions])
    }

    pub fn add_task(&mut self, session_id: &str, text: &str) -> Result<Task, InfraError> {
        let text = normalized_label(text, "task text")?;
        let now = self.now();
        let task = Task {
            id: next_id("task", now),
            text,
            completed: false,
        };
        self.session_mut(session_id)?.tasks.insert(0, task.clone());
        self.commit(&[LocalRecord::ActiveSessions])?;
        Ok(task)
    }

    pub fn toggle_task(&mut self, session_id: &str, task_id: &str) -> Result<Task, InfraError> {
        let task = self
            .session_mut(session_id)?
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| InfraError::invalid_input(format!("task not found: {task_id}")))?;
        task.completed = !task.completed;
        let task = task.clone();
        self.commit(&[LocalRecord::ActiveSessions])?;
        Ok(task)
    }

    pub fn remove_task(&mut self, session_id: &str, task_id: &str) -> Result<(), InfraError> {
        let tasks = &mut self.session_mut(session_id)?.tasks;
        let before = tasks.len();
        tasks.retain(|task| task.id != task_id);
        if tasks.len() == before {
            return Err(InfraError::invalid_input(format!("task not found: {task_id}")));
        }
        self.commit(&[LocalRecord::ActiveSessions])
    }

    /// Applies to intervals started afterwards; running breaks keep their remaining time.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        self.settings = settings;
        tracing::info!(?settings, "settings updated");
        self.commit(&[LocalRecord::Settings])
    }

    pub fn add_manual_entry(&mut self, manual: ManualEntry) -> Result<LogEntry, InfraError> {
        let now = self.now();
        if manual.end_time <= manual.start_time {
            return Err(InfraError::invalid_input("manual entry must end after it starts"));
        }
        if manual.end_time > now {
            return Err(InfraError::invalid_input("manual entry must not end in the future"));
        }
        let elapsed = (manual.end_time - manual.start_time).num_seconds().max(0) as u64;
        if elapsed < CONFIRMATION_THRESHOLD_SECONDS && !manual.confirm_short {
            return Err(InfraError::invalid_input(
                "entries shorter than a minute must be confirmed",
            ));
        }

        let entry = LogEntry {
            id: self.unique_entry_id(manual.end_time, MANUAL_SOURCE),
            start_time: manual.start_time,
            end_time: manual.end_time,
            duration_minutes: logged_duration_minutes(manual.start_time, manual.end_time),
            project_label: optional_text(manual.project_label.as_deref()),
            summary: optional_text(manual.summary.as_deref()),
            source_session_id: None,
        };
        if let Some(label) = &entry.project_label {
            recent_projects::remember(
                &mut self.recent_projects,
                label,
                self.config.recent_projects_limit,
            );
        }
        self.full_log.push(entry.clone());
        tracing::info!(entry_id = %entry.id, "manual entry added");
        self.commit(&[LocalRecord::Log, LocalRecord::RecentProjects])?;
        Ok(entry)
    }

    pub fn edit_log_entry(
        &mut self,
        entry_id: &str,
        edit: LogEntryEdit,
    ) -> Result<LogEntry, InfraError> {
        let now = self.now();
        let index = self.log_index(entry_id)?;
        let mut entry = self.full_log[index].clone();
        if let Some(start_time) = edit.start_time {
            entry.start_time = start_time;
        }
        if let Some(end_time) = edit.end_time {
            entry.end_time = end_time;
        }
        if let Some(label) = edit.project_label.as_deref() {
            entry.project_label = optional_text(Some(label));
        }
        if let Some(summary) = edit.summary.as_deref() {
            entry.summary = optional_text(Some(summary));
        }
        entry.validate().map_err(InfraError::InvalidInput)?;
        if entry.end_time > now {
            return Err(InfraError::invalid_input("log entry must not end in the future"));
        }
        entry.duration_minutes = logged_duration_minutes(entry.start_time, entry.end_time);

        if let Some(label) = &entry.project_label {
            recent_projects::remember(
                &mut self.recent_projects,
                label,
                self.config.recent_projects_limit,
            );
        }
        self.full_log[index] = entry.clone();
        self.commit(&[LocalRecord::Log, LocalRecord::RecentProjects])?;
        Ok(entry)
    }

    /// Hides the entry at once and keeps it restorable until the grace
    /// window closes. The remote document is only updated on finalize.
    pub fn delete_log_entry(&mut self, entry_id: &str) -> Result<(), InfraError> {
        let index = self.log_index(entry_id)?;
        if let Some(previous) = self.undo.take_any() {
            self.timers.cancel_finalize(previous.token);
            self.finalize(previous)?;
        }

        let now = self.now();
        let grace = self.config.undo_grace;
        let entry = self.full_log.remove(index);
        let deadline = now
            + Duration::milliseconds(i64::try_from(grace.as_millis()).unwrap_or(i64::MAX / 2));
        let (token, _) = self.undo.begin(entry, index, deadline);
        self.timers.schedule_finalize(token, grace);
        tracing::info!(entry_id, token, "log entry deleted; undo window open");

        let result = self
            .persistence
            .persist_local(&[LocalRecord::Log], &self.document(), now);
        self.publish();
        result
    }

    /// Restores the pending deletion if its window is still open. Returns the
    /// restored entry, or `None` when there was nothing left to undo.
    pub fn undo_delete(&mut self) -> Result<Option<LogEntry>, InfraError> {
        let now = self.now();
        match self.undo.take_for_undo(now) {
            Some(pending) => {
                self.timers.cancel_finalize(pending.token);
                let index = pending.index.min(self.full_log.len());
                self.full_log.insert(index, pending.entry.clone());
                tracing::info!(entry_id = %pending.entry.id, "log entry deletion undone");
                self.commit(&[LocalRecord::Log])?;
                Ok(Some(pending.entry))
            }
            None => {
                if let Some(expired) = self.undo.take_expired(now) {
                    self.timers.cancel_finalize(expired.token);
                    self.finalize(expired)?;
                }
                Ok(None)
            }
        }
    }

    /// Timer callback for the deletion identified by `token`; stale tokens are ignored.
    pub fn finalize_deletion(&mut self, token: u64) -> Result<(), InfraError> {
        match self.undo.take_due(token) {
            Some(pending) => self.finalize(pending),
            None => Ok(()),
        }
    }

    /// One second of running time for every running session.
    pub fn tick(&mut self) -> Result<(), InfraError> {
        let mut finished_breaks = Vec::new();
        for id in &self.session_order {
            if let Some(session) = self.sessions.get_mut(id) {
                if interval::advance(session, 1) {
                    finished_breaks.push(id.clone());
                }
            }
        }
        if finished_breaks.is_empty() {
            self.publish();
            return Ok(());
        }
        tracing::info!(sessions = ?finished_breaks, "break finished; back to work");
        self.commit(&[LocalRecord::ActiveSessions])
    }

    /// Catches running work intervals up with wall-clock time after the
    /// process was suspended, and finalizes an overdue deletion.
    pub fn on_foreground(&mut self) -> Result<(), InfraError> {
        let now = self.now();
        for session in self.sessions.values_mut() {
            sync_work_elapsed(session, now);
        }
        tracing::debug!("foreground resync");
        if let Some(expired) = self.undo.take_expired(now) {
            self.timers.cancel_finalize(expired.token);
            self.finalize(expired)?;
        }
        self.publish();
        Ok(())
    }

    /// Replaces local state with a remote snapshot and mirrors it locally.
    /// Writes this device has queued but the remote has not confirmed stay
    /// applied; snapshots older than a confirmed write are ignored.
    /// Applying the same snapshot twice leaves the same state.
    pub fn apply_snapshot(&mut self, snapshot: RemoteDocument) -> Result<(), InfraError> {
        let Some(mut snapshot) = self.persistence.reconcile_snapshot(snapshot) else {
            return Ok(());
        };
        let now = self.now();
        if let Some(pending_id) = self.undo.pending_id() {
            snapshot.log.retain(|entry| entry.id != pending_id);
        }
        self.replace_state(snapshot, now);

        let sessions = &mut self.sessions;
        self.pending_confirmations.retain(|session_id, confirmation| {
            match sessions.get_mut(session_id) {
                Some(session) if session.is_working() => {
                    confirmation.was_running = session.is_running;
                    session.is_running = false;
                    true
                }
                _ => false,
            }
        });

        tracing::debug!(
            sessions = self.session_order.len(),
            log_entries = self.full_log.len(),
            "remote snapshot applied"
        );
        let result = self.persistence.mirror_all(&self.document(), now);
        self.reconcile_ticker();
        self.publish();
        result
    }

    /// Switches tier or account. A different account swaps the local scope;
    /// anonymous data is never carried into an account.
    pub fn set_account(&mut self, account: AccountState) -> Result<(), InfraError> {
        let account_id = account.normalized_account_id().map(ToOwned::to_owned);
        let next_scope = account_id
            .as_deref()
            .map(account_scope)
            .unwrap_or_else(|| ANONYMOUS_SCOPE.to_string());
        let is_premium = account.is_premium && account_id.is_some();

        if next_scope != self.persistence.scope() {
            if let Some(pending) = self.undo.take_any() {
                self.timers.cancel_finalize(pending.token);
                self.finalize(pending)?;
            }
            let now = self.now();
            self.persistence.set_scope(next_scope.clone());
            self.pending_confirmations.clear();
            let state = self
                .persistence
                .load_state(now, self.config.recent_projects_limit)?;
            self.replace_state(state, now);
            tracing::info!(scope = %next_scope, "account scope switched");
        }

        self.account = AccountState {
            account_id,
            is_premium,
        };
        self.reconcile_ticker();
        self.publish();
        Ok(())
    }

    /// Routes future writes to the signed-in account's remote document.
    /// Returns the document key and the acks the draining writer reports to.
    pub fn connect_remote(
        &mut self,
        sender: mpsc::UnboundedSender<RemoteWrite>,
    ) -> Result<(String, WriteAcks), InfraError> {
        let account_id = self
            .account
            .normalized_account_id()
            .ok_or_else(|| InfraError::invalid_input("remote sync requires a signed-in account"))?;
        let key = self.config.document_key(account_id);
        let acks = self.persistence.connect_remote(key.clone(), sender);
        Ok((key, acks))
    }

    pub fn disconnect_remote(&mut self) {
        self.persistence.disconnect_remote();
    }

    /// Document key writes currently go to, if connected.
    pub fn remote_key(&self) -> Option<&str> {
        self.persistence.remote_key()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn ordered_sessions(&self) -> Vec<ActiveSession> {
        self.session_order
            .iter()
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect()
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut ActiveSession, InfraError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| InfraError::SessionNotFound(session_id.to_string()))
    }

    fn log_index(&self, entry_id: &str) -> Result<usize, InfraError> {
        self.full_log
            .iter()
            .position(|entry| entry.id == entry_id)
            .ok_or_else(|| InfraError::LogEntryNotFound(entry_id.to_string()))
    }

    fn take_confirmation(&mut self, session_id: &str) -> Result<PendingConfirmation, InfraError> {
        self.pending_confirmations.remove(session_id).ok_or_else(|| {
            InfraError::invalid_input(format!("no confirmation pending for session {session_id}"))
        })
    }

    fn ensure_not_awaiting(&self, session_id: &str) -> Result<(), InfraError> {
        if self.pending_confirmations.contains_key(session_id) {
            return Err(InfraError::invalid_input(format!(
                "session {session_id} is awaiting a logging decision"
            )));
        }
        Ok(())
    }

    fn unique_entry_id(&self, end_time: DateTime<Utc>, source: &str) -> String {
        let pending = self.undo.pending_id();
        log_entry_id(
            end_time,
            source,
            self.full_log.iter().map(|entry| entry.id.as_str()).chain(pending),
        )
    }

    fn replace_state(&mut self, state: RemoteDocument, now: DateTime<Utc>) {
        self.settings = if state.settings.validate().is_ok() {
            state.settings
        } else {
            Settings::default()
        };
        self.full_log = state.log;
        self.recent_projects =
            recent_projects::sanitize(&state.recent_projects, self.config.recent_projects_limit);
        self.sessions.clear();
        self.session_order.clear();
        for mut session in state.active_sessions {
            if self.sessions.contains_key(&session.id) {
                tracing::warn!(session_id = %session.id, "dropping duplicate session");
                continue;
            }
            if session.interval_kind.is_break() {
                session.work_interval_start_timestamp = None;
            } else if session.is_running {
                let anchor = session
                    .work_interval_start_timestamp
                    .unwrap_or_else(|| now - seconds(session.elapsed_or_remaining_seconds));
                session.work_interval_start_timestamp = Some(anchor);
                session.elapsed_or_remaining_seconds = interval::elapsed_since(anchor, now);
            }
            self.session_order.push(session.id.clone());
            self.sessions.insert(session.id.clone(), session);
        }
    }

    fn complete(
        &mut self,
        session_id: &str,
        kind: CompletionKind,
    ) -> Result<CompletionOutcome, InfraError> {
        self.ensure_not_awaiting(session_id)?;
        let now = self.now();
        let session = self.session_mut(session_id)?;
        if kind == CompletionKind::End && !session.is_working() {
            return Err(InfraError::invalid_input("session is not in a work interval"));
        }
        sync_work_elapsed(session, now);
        if !session.has_work_in_progress() {
            return self.finish_without_log(session_id, kind);
        }
        let elapsed = session.elapsed_or_remaining_seconds;
        if elapsed < CONFIRMATION_THRESHOLD_SECONDS {
            let confirmation = PendingConfirmation {
                session_id: session_id.to_string(),
                kind,
                elapsed_seconds: elapsed,
                ended_at: now,
                was_running: session.is_running,
            };
            session.is_running = false;
            self.pending_confirmations
                .insert(session_id.to_string(), confirmation.clone());
            tracing::info!(session_id, elapsed, ?kind, "short interval awaiting confirmation");
            self.reconcile_ticker();
            self.publish();
            return Ok(CompletionOutcome::ConfirmationRequired(confirmation));
        }
        self.finish_with_log(session_id, kind, elapsed, now)
    }

    fn finish_with_log(
        &mut self,
        session_id: &str,
        kind: CompletionKind,
        elapsed_seconds: u64,
        ended_at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, InfraError> {
        let session = self
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| InfraError::SessionNotFound(session_id.to_string()))?;
        let start_time = ended_at - seconds(elapsed_seconds);
        let entry = LogEntry {
            id: self.unique_entry_id(ended_at, &session.id),
            start_time,
            end_time: ended_at,
            duration_minutes: logged_duration_minutes(start_time, ended_at),
            project_label: Some(session.project_label.clone()),
            summary: None,
            source_session_id: Some(session.id.clone()),
        };
        self.full_log.push(entry.clone());
        recent_projects::remember(
            &mut self.recent_projects,
            &session.project_label,
            self.config.recent_projects_limit,
        );

        let settings = self.settings;
        let next_break = match kind {
            CompletionKind::End => Some(interval::complete_work_interval(
                self.session_mut(session_id)?,
                &settings,
            )),
            CompletionKind::Remove => {
                self.detach_session(session_id);
                None
            }
        };
        tracing::info!(
            session_id,
            entry_id = %entry.id,
            duration_minutes = entry.duration_minutes,
            "work interval logged"
        );
        self.commit(&[
            LocalRecord::Log,
            LocalRecord::RecentProjects,
            LocalRecord::ActiveSessions,
        ])?;
        Ok(CompletionOutcome::Logged { entry, next_break })
    }

    fn finish_without_log(
        &mut self,
        session_id: &str,
        kind: CompletionKind,
    ) -> Result<CompletionOutcome, InfraError> {
        match kind {
            CompletionKind::End => interval::reset_to_fresh_work(self.session_mut(session_id)?),
            CompletionKind::Remove => {
                self.session_mut(session_id)?;
                self.detach_session(session_id);
                tracing::info!(session_id, "session removed");
            }
        }
        self.commit(&[LocalRecord::ActiveSessions])?;
        Ok(CompletionOutcome::NothingLogged)
    }

    fn detach_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.session_order.retain(|id| id != session_id);
        self.pending_confirmations.remove(session_id);
    }

    fn finalize(&mut self, pending: PendingDeletion) -> Result<(), InfraError> {
        tracing::info!(entry_id = %pending.entry.id, "log entry deletion finalized");
        self.commit(&[LocalRecord::Log])
    }

    fn running_sessions(&self) -> usize {
        self.sessions.values().filter(|session| session.is_running).count()
    }

    fn reconcile_ticker(&mut self) {
        let running = self.running_sessions();
        self.ticker.reconcile(running, self.timers.as_mut());
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    /// Persists `records`, then refreshes the ticker and observers even when
    /// the local write failed.
    fn commit(&mut self, records: &[LocalRecord]) -> Result<(), InfraError> {
        let now = self.now();
        let document = self.document();
        let result = self.persistence.persist(records, &document, now);
        self.reconcile_ticker();
        self.publish();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::FakeClock;
    use crate::application::tick_scheduler::testing::{RecordingTimerDriver, TimerCall};
    use crate::infrastructure::local_store::InMemoryLocalStore;
    use proptest::prelude::*;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    struct Harness {
        engine: Engine,
        clock: FakeClock,
        timers: RecordingTimerDriver,
        local: Arc<InMemoryLocalStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_local(Arc::new(InMemoryLocalStore::default()))
        }

        fn with_local(local: Arc<InMemoryLocalStore>) -> Self {
            let clock = FakeClock::new(fixed_time());
            let timers = RecordingTimerDriver::default();
            let engine = Engine::new(
                EngineConfig::default(),
                local.clone(),
                Box::new(timers.clone()),
                clock.provider(),
            )
            .expect("engine");
            Self {
                engine,
                clock,
                timers,
                local,
            }
        }

        fn advance(&mut self, seconds: u64) {
            for _ in 0..seconds {
                self.clock.advance_seconds(1);
                self.engine.tick().expect("tick");
            }
        }

        fn session(&self, id: &str) -> ActiveSession {
            self.engine.session(id).cloned().expect("session exists")
        }

        fn run_work(&mut self, id: &str, seconds: u64) -> CompletionOutcome {
            self.engine.start(id).expect("start");
            self.advance(seconds);
            self.engine.end_work_interval(id).expect("end")
        }
    }

    fn logged(outcome: CompletionOutcome) -> (LogEntry, Option<IntervalKind>) {
        match outcome {
            CompletionOutcome::Logged { entry, next_break } => (entry, next_break),
            other => panic!("expected logged outcome, got {other:?}"),
        }
    }

    #[test]
    fn ninety_seconds_of_work_logs_two_minutes() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Q3 report").expect("add");

        let (entry, next_break) = logged(harness.run_work(&session.id, 90));

        assert_eq!(entry.duration_minutes, 2);
        assert_eq!(entry.end_time, fixed_time() + Duration::seconds(90));
        assert_eq!(entry.start_time, fixed_time());
        assert_eq!(entry.project_label.as_deref(), Some("Q3 report"));
        assert_eq!(entry.source_session_id.as_deref(), Some(session.id.as_str()));
        assert_eq!(next_break, Some(IntervalKind::ShortBreak));

        let after = harness.session(&session.id);
        assert_eq!(after.interval_kind, IntervalKind::Work);
        assert_eq!(after.elapsed_or_remaining_seconds, 0);
        assert!(!after.is_running);
        assert!(after.work_interval_start_timestamp.is_none());
        assert_eq!(after.completed_work_intervals_in_set, 1);

        let view = harness.engine.view();
        assert_eq!(view.displayed_log, vec![entry]);
        assert_eq!(view.recent_projects, vec!["Q3 report".to_string()]);
        assert!(!view.ticker_active);
    }

    #[test]
    fn fourth_completed_interval_earns_long_break() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Deep work").expect("add");

        let mut breaks = Vec::new();
        for _ in 0..4 {
            let (_, next_break) = logged(harness.run_work(&session.id, 120));
            let taken = harness.engine.take_break(&session.id).expect("take break");
            assert_eq!(Some(taken), next_break);
            harness.engine.skip_break(&session.id).expect("skip break");
            breaks.push(taken);
        }

        assert_eq!(
            breaks,
            vec![
                IntervalKind::ShortBreak,
                IntervalKind::ShortBreak,
                IntervalKind::ShortBreak,
                IntervalKind::LongBreak,
            ]
        );
    }

    #[test]
    fn break_runs_out_and_returns_to_idle_work() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Deep work").expect("add");
        logged(harness.run_work(&session.id, 120));

        harness.engine.take_break(&session.id).expect("take break");
        let on_break = harness.session(&session.id);
        assert_eq!(on_break.interval_kind, IntervalKind::ShortBreak);
        assert_eq!(on_break.elapsed_or_remaining_seconds, 300);
        assert!(on_break.is_running);

        harness.advance(300);
        let after = harness.session(&session.id);
        assert_eq!(after.interval_kind, IntervalKind::Work);
        assert_eq!(after.elapsed_or_remaining_seconds, 0);
        assert!(!after.is_running);
        assert!(!harness.engine.view().ticker_active);
    }

    #[test]
    fn take_break_requires_an_earned_break() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Deep work").expect("add");
        assert!(matches!(
            harness.engine.take_break(&session.id),
            Err(InfraError::InvalidInput(_))
        ));
        assert!(matches!(
            harness.engine.skip_break(&session.id),
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[test]
    fn short_interval_waits_for_decision_and_logs_one_minute() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Inbox").expect("add");

        let outcome = harness.run_work(&session.id, 30);
        let CompletionOutcome::ConfirmationRequired(confirmation) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(confirmation.elapsed_seconds, 30);
        assert!(harness.engine.view().displayed_log.is_empty());
        assert!(!harness.session(&session.id).is_running);
        assert!(harness.engine.start(&session.id).is_err());

        // Frozen while the decision is pending.
        harness.advance(10);
        assert_eq!(harness.session(&session.id).elapsed_or_remaining_seconds, 30);

        let (entry, next_break) = logged(
            harness
                .engine
                .resolve_pending(&session.id, LogDecision::Log)
                .expect("resolve"),
        );
        assert_eq!(entry.duration_minutes, 1);
        assert_eq!(entry.end_time, confirmation.ended_at);
        assert_eq!(next_break, Some(IntervalKind::ShortBreak));
        assert!(harness.engine.view().pending_confirmations.is_empty());
    }

    #[test]
    fn confirmed_short_interval_keeps_one_minute_after_reload() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Inbox").expect("add");
        let outcome = harness.run_work(&session.id, 10);
        assert!(matches!(outcome, CompletionOutcome::ConfirmationRequired(_)));
        let (entry, _) = logged(
            harness
                .engine
                .resolve_pending(&session.id, LogDecision::Log)
                .expect("resolve"),
        );
        assert_eq!(entry.duration_minutes, 1);

        let reloaded = Harness::with_local(harness.local.clone());
        let log = reloaded.engine.view().displayed_log;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, entry.id);
        assert_eq!(log[0].duration_minutes, 1);
    }

    #[test]
    fn declining_a_short_interval_logs_nothing() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Inbox").expect("add");
        harness.run_work(&session.id, 30);

        let outcome = harness
            .engine
            .resolve_pending(&session.id, LogDecision::Discard)
            .expect("resolve");
        assert_eq!(outcome, CompletionOutcome::NothingLogged);
        assert!(harness.engine.view().displayed_log.is_empty());
        let after = harness.session(&session.id);
        assert_eq!(after.elapsed_or_remaining_seconds, 0);
        assert_eq!(after.completed_work_intervals_in_set, 0);
    }

    #[test]
    fn cancelling_a_pending_end_resumes_the_interval() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("Inbox").expect("add");
        harness.run_work(&session.id, 30);
        harness.clock.advance_seconds(5);

        harness.engine.cancel_pending(&session.id).expect("cancel");
        let resumed = harness.session(&session.id);
        assert!(resumed.is_running);
        assert_eq!(resumed.elapsed_or_remaining_seconds, 35);
        assert!(harness.engine.view().ticker_active);
    }

    #[test]
    fn removing_sessions_logs_work_in_progress() {
        let mut harness = Harness::new();
        let idle = harness.engine.add_session("Idle").expect("add");
        let busy = harness.engine.add_session("Busy").expect("add");
        let brief = harness.engine.add_session("Brief").expect("add");

        assert_eq!(
            harness.engine.remove_session(&idle.id).expect("remove idle"),
            CompletionOutcome::NothingLogged
        );

        harness.engine.start(&busy.id).expect("start busy");
        harness.engine.start(&brief.id).expect("start brief");
        harness.advance(45);
        assert!(matches!(
            harness.engine.remove_session(&brief.id).expect("remove brief"),
            CompletionOutcome::ConfirmationRequired(_)
        ));
        harness
            .engine
            .resolve_pending(&brief.id, LogDecision::Discard)
            .expect("discard brief");

        harness.advance(60);
        let (entry, next_break) =
            logged(harness.engine.remove_session(&busy.id).expect("remove busy"));
        assert_eq!(entry.duration_minutes, 2);
        assert_eq!(next_break, None);

        let view = harness.engine.view();
        assert!(view.sessions.is_empty());
        assert_eq!(view.displayed_log.len(), 1);
        assert!(matches!(
            harness.engine.start(&busy.id),
            Err(InfraError::SessionNotFound(_))
        ));
    }

    #[test]
    fn shared_ticker_starts_and_stops_once() {
        let mut harness = Harness::new();
        let first = harness.engine.add_session("A").expect("add");
        let second = harness.engine.add_session("B").expect("add");

        harness.engine.start(&first.id).expect("start first");
        harness.engine.start(&second.id).expect("start second");
        harness.advance(3);
        harness.engine.pause(&first.id).expect("pause first");
        harness.advance(2);
        harness.engine.pause(&second.id).expect("pause second");

        assert_eq!(harness.timers.count(&TimerCall::StartTicker), 1);
        assert_eq!(harness.timers.count(&TimerCall::StopTicker), 1);
        assert_eq!(harness.session(&first.id).elapsed_or_remaining_seconds, 3);
        assert_eq!(harness.session(&second.id).elapsed_or_remaining_seconds, 5);
    }

    #[test]
    fn foreground_recomputes_running_work_after_suspension() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        harness.engine.start(&session.id).expect("start");
        harness.advance(10);

        harness.clock.advance_seconds(600);
        harness.engine.on_foreground().expect("foreground");
        assert_eq!(harness.session(&session.id).elapsed_or_remaining_seconds, 610);
    }

    #[test]
    fn edit_start_time_rejects_future_and_moves_anchor() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");

        assert!(matches!(
            harness
                .engine
                .edit_start_time(&session.id, fixed_time() + Duration::seconds(1)),
            Err(InfraError::InvalidInput(_))
        ));

        harness
            .engine
            .edit_start_time(&session.id, fixed_time() - Duration::minutes(20))
            .expect("edit start");
        let edited = harness.session(&session.id);
        assert_eq!(edited.elapsed_or_remaining_seconds, 1200);

        harness.engine.start(&session.id).expect("start");
        harness.advance(5);
        let (entry, _) = logged(harness.engine.end_work_interval(&session.id).expect("end"));
        assert_eq!(entry.start_time, fixed_time() - Duration::minutes(20));
        assert_eq!(entry.duration_minutes, 20);
    }

    #[test]
    fn undo_restores_entry_inside_grace_window() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        let (first, _) = logged(harness.run_work(&session.id, 120));
        let (second, _) = logged(harness.run_work(&session.id, 120));

        harness.engine.delete_log_entry(&first.id).expect("delete");
        let view = harness.engine.view();
        assert_eq!(view.displayed_log, vec![second.clone()]);
        assert_eq!(view.pending_deletion.as_deref(), Some(first.id.as_str()));

        harness.clock.advance_seconds(4);
        let restored = harness.engine.undo_delete().expect("undo");
        assert_eq!(restored.as_ref(), Some(&first));
        assert_eq!(harness.engine.view().displayed_log, vec![first, second]);
        assert!(harness
            .timers
            .calls()
            .iter()
            .any(|call| matches!(call, TimerCall::CancelFinalize(_))));
    }

    #[test]
    fn undo_after_grace_window_is_a_noop() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        let (entry, _) = logged(harness.run_work(&session.id, 120));

        harness.engine.delete_log_entry(&entry.id).expect("delete");
        harness.clock.advance_seconds(6);
        assert_eq!(harness.engine.undo_delete().expect("undo"), None);
        let view = harness.engine.view();
        assert!(view.displayed_log.is_empty());
        assert!(view.pending_deletion.is_none());
    }

    #[test]
    fn deletion_reaches_remote_only_when_finalized() {
        let mut harness = Harness::new();
        harness
            .engine
            .set_account(AccountState::signed_in("acct-1", true))
            .expect("sign in");
        let (sender, mut writes) = mpsc::unbounded_channel();
        let (key, _acks) = harness.engine.connect_remote(sender).expect("connect");
        assert_eq!(key, "users/acct-1");

        let session = harness.engine.add_session("A").expect("add");
        let (entry, _) = logged(harness.run_work(&session.id, 120));
        while writes.try_recv().is_ok() {}

        harness.engine.delete_log_entry(&entry.id).expect("delete");
        assert!(writes.try_recv().is_err());

        let token = harness
            .timers
            .calls()
            .iter()
            .find_map(|call| match call {
                TimerCall::ScheduleFinalize(token, delay) => {
                    assert_eq!(*delay, std::time::Duration::from_secs(5));
                    Some(*token)
                }
                _ => None,
            })
            .expect("finalize scheduled");
        harness.engine.finalize_deletion(token).expect("finalize");

        let write = writes.try_recv().expect("remote write after finalize");
        assert_eq!(write.patch.log, Some(Vec::new()));
        assert_eq!(harness.engine.undo_delete().expect("undo"), None);
    }

    fn connected(harness: &mut Harness) -> (mpsc::UnboundedReceiver<RemoteWrite>, WriteAcks) {
        harness
            .engine
            .set_account(AccountState::signed_in("acct-1", false))
            .expect("sign in");
        let (sender, writes) = mpsc::unbounded_channel();
        let (_, acks) = harness.engine.connect_remote(sender).expect("connect");
        (writes, acks)
    }

    fn last_write(writes: &mut mpsc::UnboundedReceiver<RemoteWrite>) -> RemoteWrite {
        let mut last = None;
        while let Ok(write) = writes.try_recv() {
            last = Some(write);
        }
        last.expect("at least one queued write")
    }

    fn labels(sessions: &[ActiveSession]) -> Vec<&str> {
        sessions.iter().map(|session| session.project_label.as_str()).collect()
    }

    #[test]
    fn echo_of_an_earlier_write_keeps_later_queued_writes() {
        let mut harness = Harness::new();
        let (mut writes, _acks) = connected(&mut harness);
        harness.engine.add_session("X").expect("add X");
        let first = writes.try_recv().expect("first write");
        harness.engine.add_session("Y").expect("add Y");

        harness.engine.apply_snapshot(first.document).expect("echo");
        assert_eq!(labels(&harness.engine.view().sessions), vec!["X", "Y"]);

        harness.engine.add_session("Z").expect("add Z");
        let latest = last_write(&mut writes);
        assert_eq!(labels(&latest.document.active_sessions), vec!["X", "Y", "Z"]);
        let patched = latest.patch.active_sessions.expect("sessions patched");
        assert_eq!(labels(&patched), vec!["X", "Y", "Z"]);
    }

    #[test]
    fn echo_of_an_earlier_write_keeps_a_logged_interval() {
        let mut harness = Harness::new();
        let (mut writes, _acks) = connected(&mut harness);
        let session = harness.engine.add_session("A").expect("add");
        let first = writes.try_recv().expect("first write");
        let (entry, _) = logged(harness.run_work(&session.id, 120));

        harness.engine.apply_snapshot(first.document).expect("echo");
        assert_eq!(harness.engine.view().displayed_log, vec![entry]);
    }

    #[test]
    fn snapshot_older_than_an_acknowledged_write_is_ignored() {
        let mut harness = Harness::new();
        let (mut writes, acks) = connected(&mut harness);
        harness.engine.add_session("X").expect("add X");
        let first = writes.try_recv().expect("first write");
        harness.clock.advance_seconds(1);
        harness.engine.add_session("Y").expect("add Y");
        let latest = last_write(&mut writes);
        acks.acknowledge(latest.sequence);

        harness.engine.apply_snapshot(first.document).expect("stale snapshot");
        assert_eq!(labels(&harness.engine.view().sessions), vec!["X", "Y"]);

        let mut external = latest.document.clone();
        external.settings = Settings {
            work_minutes: 45,
            ..Settings::default()
        };
        external.last_updated = Some(fixed_time() + Duration::seconds(2));
        harness.engine.apply_snapshot(external).expect("newer snapshot");
        let view = harness.engine.view();
        assert_eq!(view.settings.work_minutes, 45);
        assert_eq!(labels(&view.sessions), vec!["X", "Y"]);
    }

    #[test]
    fn free_tier_hides_entries_older_than_three_days() {
        let mut harness = Harness::new();
        harness
            .engine
            .set_account(AccountState::signed_in("acct-1", false))
            .expect("sign in");
        let old_end = fixed_time() - Duration::days(4);
        harness
            .engine
            .add_manual_entry(ManualEntry {
                start_time: old_end - Duration::minutes(25),
                end_time: old_end,
                project_label: Some("Archive".to_string()),
                summary: None,
                confirm_short: false,
            })
            .expect("old entry");
        harness
            .engine
            .add_manual_entry(ManualEntry {
                start_time: fixed_time() - Duration::minutes(30),
                end_time: fixed_time() - Duration::minutes(5),
                project_label: Some("Today".to_string()),
                summary: None,
                confirm_short: false,
            })
            .expect("recent entry");

        let free = harness.engine.view();
        assert_eq!(free.displayed_log.len(), 1);
        assert!(free.history_exceeds_free_limit);
        assert_eq!(harness.engine.log_stats().entry_count, 1);

        harness
            .engine
            .set_account(AccountState::signed_in("acct-1", true))
            .expect("upgrade");
        let premium = harness.engine.view();
        assert_eq!(premium.displayed_log.len(), 2);
        assert!(!premium.history_exceeds_free_limit);
    }

    #[test]
    fn short_manual_entries_need_confirmation() {
        let mut harness = Harness::new();
        let mut manual = ManualEntry {
            start_time: fixed_time() - Duration::seconds(40),
            end_time: fixed_time(),
            project_label: None,
            summary: Some("quick call".to_string()),
            confirm_short: false,
        };
        assert!(matches!(
            harness.engine.add_manual_entry(manual.clone()),
            Err(InfraError::InvalidInput(_))
        ));

        manual.confirm_short = true;
        let entry = harness.engine.add_manual_entry(manual).expect("confirmed entry");
        assert_eq!(entry.duration_minutes, 1);
        assert!(entry.id.ends_with("-manual"));

        let future = ManualEntry {
            start_time: fixed_time(),
            end_time: fixed_time() + Duration::minutes(5),
            project_label: None,
            summary: None,
            confirm_short: true,
        };
        assert!(harness.engine.add_manual_entry(future).is_err());
    }

    #[test]
    fn edit_log_entry_recomputes_duration_and_clears_label() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        let (entry, _) = logged(harness.run_work(&session.id, 600));

        let edited = harness
            .engine
            .edit_log_entry(
                &entry.id,
                LogEntryEdit {
                    start_time: Some(entry.end_time - Duration::minutes(45)),
                    project_label: Some(String::new()),
                    summary: Some("Wrote the outline".to_string()),
                    ..LogEntryEdit::default()
                },
            )
            .expect("edit");
        assert_eq!(edited.duration_minutes, 45);
        assert!(edited.project_label.is_none());
        assert_eq!(edited.summary.as_deref(), Some("Wrote the outline"));

        let reversed = LogEntryEdit {
            start_time: Some(entry.end_time + Duration::minutes(1)),
            ..LogEntryEdit::default()
        };
        assert!(harness.engine.edit_log_entry(&entry.id, reversed).is_err());
        assert!(matches!(
            harness.engine.edit_log_entry("missing", LogEntryEdit::default()),
            Err(InfraError::LogEntryNotFound(_))
        ));
    }

    #[test]
    fn tasks_are_prepended_toggled_and_removed() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        let first = harness.engine.add_task(&session.id, "outline").expect("task");
        let second = harness.engine.add_task(&session.id, " draft ").expect("task");

        let tasks = harness.session(&session.id).tasks;
        assert_eq!(tasks[0].text, "draft");
        assert_eq!(tasks[1].id, first.id);

        assert!(harness.engine.toggle_task(&session.id, &first.id).expect("toggle").completed);
        assert_eq!(
            harness.session(&session.id).completed_task_texts(),
            vec!["outline".to_string()]
        );

        harness.engine.remove_task(&session.id, &second.id).expect("remove");
        assert_eq!(harness.session(&session.id).tasks.len(), 1);
        assert!(harness.engine.remove_task(&session.id, &second.id).is_err());
        assert!(harness.engine.add_task(&session.id, "  ").is_err());
    }

    #[test]
    fn settings_validation_and_persistence() {
        let mut harness = Harness::new();
        let invalid = Settings {
            work_minutes: 0,
            ..Settings::default()
        };
        assert!(matches!(
            harness.engine.update_settings(invalid),
            Err(InfraError::InvalidInput(_))
        ));

        let custom = Settings {
            short_break_minutes: 10,
            ..Settings::default()
        };
        harness.engine.update_settings(custom).expect("update");
        let reloaded = Harness::with_local(harness.local.clone());
        assert_eq!(reloaded.engine.view().settings, custom);
    }

    #[test]
    fn restart_resumes_running_work_from_anchor() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        harness.engine.start(&session.id).expect("start");
        harness.advance(30);

        let restarted = Harness::with_local(harness.local.clone());
        let resumed = restarted.session(&session.id);
        assert!(resumed.is_running);
        assert_eq!(resumed.work_interval_start_timestamp, Some(fixed_time()));
        assert!(restarted.engine.view().ticker_active);
    }

    #[test]
    fn applying_a_snapshot_twice_is_idempotent() {
        let mut harness = Harness::new();
        let mut running = ActiveSession::new("ses-remote", "Remote");
        running.is_running = true;
        running.work_interval_start_timestamp = Some(fixed_time() - Duration::seconds(100));
        let snapshot = RemoteDocument {
            settings: Settings {
                work_minutes: 50,
                ..Settings::default()
            },
            active_sessions: vec![running],
            recent_projects: vec!["Remote".to_string()],
            last_updated: Some(fixed_time()),
            ..RemoteDocument::default()
        };

        harness.engine.apply_snapshot(snapshot.clone()).expect("first apply");
        let first = harness.engine.view();
        harness.engine.apply_snapshot(snapshot).expect("second apply");
        let second = harness.engine.view();

        assert_eq!(first, second);
        assert_eq!(second.sessions[0].elapsed_or_remaining_seconds, 100);
        assert_eq!(second.settings.work_minutes, 50);
        assert!(second.ticker_active);
        assert!(harness
            .local
            .load(ANONYMOUS_SCOPE, LocalRecord::Settings)
            .expect("load")
            .is_some());
    }

    #[test]
    fn snapshot_keeps_pending_deletion_hidden() {
        let mut harness = Harness::new();
        let session = harness.engine.add_session("A").expect("add");
        let (entry, _) = logged(harness.run_work(&session.id, 120));
        let snapshot = harness.engine.document();

        harness.engine.delete_log_entry(&entry.id).expect("delete");
        harness.engine.apply_snapshot(snapshot).expect("apply");
        assert!(harness.engine.view().displayed_log.is_empty());

        harness.engine.undo_delete().expect("undo");
        assert_eq!(harness.engine.view().displayed_log, vec![entry]);
    }

    #[test]
    fn signing_in_never_shows_anonymous_data() {
        let mut harness = Harness::new();
        harness.engine.add_session("Anonymous work").expect("add");

        harness
            .engine
            .set_account(AccountState::signed_in("acct-1", false))
            .expect("sign in");
        assert!(harness.engine.view().sessions.is_empty());
        harness.engine.add_session("Account work").expect("add");

        harness.engine.set_account(AccountState::anonymous()).expect("sign out");
        let view = harness.engine.view();
        assert_eq!(view.sessions.len(), 1);
        assert_eq!(view.sessions[0].project_label, "Anonymous work");
        assert!(!view.account.is_premium);
        assert!(harness.engine.connect_remote(mpsc::unbounded_channel().0).is_err());
    }

    #[test]
    fn observers_see_every_change() {
        let mut harness = Harness::new();
        let mut receiver = harness.engine.subscribe();
        harness.engine.add_session("A").expect("add");
        assert!(receiver.has_changed().expect("sender alive"));
        assert_eq!(receiver.borrow_and_update().sessions.len(), 1);
    }

    proptest! {
        #[test]
        fn elapsed_matches_running_time_across_suspensions(
            steps in prop::collection::vec((any::<bool>(), 0u64..90u64, any::<bool>()), 1..16)
        ) {
            let mut harness = Harness::new();
            let session = harness.engine.add_session("Prop").expect("add");
            let mut running = false;
            let mut expected = 0u64;

            for (toggle, seconds, suspended) in steps {
                if toggle {
                    if running {
                        harness.engine.pause(&session.id).expect("pause");
                    } else {
                        harness.engine.start(&session.id).expect("start");
                    }
                    running = !running;
                }
                if suspended {
                    harness.clock.advance_seconds(seconds as i64);
                    harness.engine.on_foreground().expect("foreground");
                } else {
                    harness.advance(seconds);
                }
                if running {
                    expected += seconds;
                }
                prop_assert_eq!(
                    harness.session(&session.id).elapsed_or_remaining_seconds,
                    expected
                );
            }
        }
    }
}
