use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WORK_MINUTES: u32 = 25;
pub const DEFAULT_SHORT_BREAK_MINUTES: u32 = 5;
pub const DEFAULT_LONG_BREAK_MINUTES: u32 = 15;
pub const DEFAULT_SESSIONS_PER_SET: u32 = 4;
pub const MANUAL_SOURCE: &str = "manual";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub sessions_per_set: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_minutes: DEFAULT_WORK_MINUTES,
            short_break_minutes: DEFAULT_SHORT_BREAK_MINUTES,
            long_break_minutes: DEFAULT_LONG_BREAK_MINUTES,
            sessions_per_set: DEFAULT_SESSIONS_PER_SET,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        validate_positive(self.work_minutes, "settings.work_minutes")?;
        validate_positive(self.short_break_minutes, "settings.short_break_minutes")?;
        validate_positive(self.long_break_minutes, "settings.long_break_minutes")?;
        validate_positive(self.sessions_per_set, "settings.sessions_per_set")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum IntervalKind {
    Work,
    ShortBreak,
    LongBreak,
}

impl IntervalKind {
    pub fn is_break(self) -> bool {
        !matches!(self, Self::Work)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::ShortBreak => "shortBreak",
            Self::LongBreak => "longBreak",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "work" => Some(Self::Work),
            "shortBreak" | "short_break" => Some(Self::ShortBreak),
            "longBreak" | "long_break" => Some(Self::LongBreak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub completed: bool,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.text, "task.text")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub id: String,
    pub project_label: String,
    pub tasks: Vec<Task>,
    pub interval_kind: IntervalKind,
    pub elapsed_or_remaining_seconds: u64,
    pub is_running: bool,
    pub completed_work_intervals_in_set: u32,
    pub work_interval_start_timestamp: Option<DateTime<Utc>>,
}

impl ActiveSession {
    pub fn new(id: impl Into<String>, project_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_label: project_label.into(),
            tasks: Vec::new(),
            interval_kind: IntervalKind::Work,
            elapsed_or_remaining_seconds: 0,
            is_running: false,
            completed_work_intervals_in_set: 0,
            work_interval_start_timestamp: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        validate_non_empty(&self.project_label, "session.project_label")?;
        if self.interval_kind.is_break() && self.work_interval_start_timestamp.is_some() {
            return Err(
                "session.work_interval_start_timestamp must be empty during a break".to_string(),
            );
        }
        for task in &self.tasks {
            task.validate()?;
        }
        Ok(())
    }

    pub fn is_working(&self) -> bool {
        self.interval_kind == IntervalKind::Work
    }

    pub fn has_work_in_progress(&self) -> bool {
        self.is_working() && self.elapsed_or_remaining_seconds >= 1
    }

    pub fn completed_task_texts(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| task.completed)
            .map(|task| task.text.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<String>,
}

impl LogEntry {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "log.id")?;
        if self.end_time < self.start_time {
            return Err("log.end_time must be >= log.start_time".to_string());
        }
        Ok(())
    }
}

/// Whole minutes between two instants, rounding half up.
pub fn duration_minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    let seconds = (end - start).num_seconds().max(0) as u64;
    u32::try_from((seconds + 30) / 60).unwrap_or(u32::MAX)
}

/// Minutes recorded for a logged interval. Confirmed short intervals count as one.
pub fn logged_duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    duration_minutes_between(start, end).max(1)
}

/// `{endTimestampMillis}-{source}`, suffixed until it no longer collides.
pub fn log_entry_id<'a>(
    end_time: DateTime<Utc>,
    source: &str,
    existing: impl Iterator<Item = &'a str> + Clone,
) -> String {
    let base = format!("{}-{}", end_time.timestamp_millis(), source.trim());
    if !existing.clone().any(|id| id == base) {
        return base;
    }
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !existing.clone().any(|id| id == candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub settings: Settings,
    pub log: Vec<LogEntry>,
    pub active_sessions: Vec<ActiveSession>,
    pub recent_projects: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountState {
    pub account_id: Option<String>,
    pub is_premium: bool,
}

impl AccountState {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(account_id: impl Into<String>, is_premium: bool) -> Self {
        Self {
            account_id: Some(account_id.into()),
            is_premium,
        }
    }

    pub fn normalized_account_id(&self) -> Option<&str> {
        self.account_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.normalized_account_id().is_some()
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_positive(value: u32, field_name: &str) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{field_name} must be > 0"));
    }
    Ok(())
}
