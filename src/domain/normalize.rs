//! Repairs persisted records written by older schemas or damaged stores.
//!
//! Every function here accepts whatever JSON was found and returns a usable
//! value, filling gaps with defaults instead of rejecting the record. Only log
//! entries without any usable timestamp are dropped, since no duration can be
//! derived for them.

use crate::domain::models::{
    logged_duration_minutes, ActiveSession, IntervalKind, LogEntry, RemoteDocument, Settings, Task,
};
use crate::domain::recent_projects;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

const UNTITLED_PROJECT: &str = "Untitled";
const DURATION_KEYS: &[&str] = &["durationMinutes", "duration_minutes"];

pub fn settings(value: &Value) -> Settings {
    let defaults = Settings::default();
    Settings {
        work_minutes: positive_u32(value, &["workMinutes", "work_minutes"])
            .unwrap_or(defaults.work_minutes),
        short_break_minutes: positive_u32(value, &["shortBreakMinutes", "short_break_minutes"])
            .unwrap_or(defaults.short_break_minutes),
        long_break_minutes: positive_u32(value, &["longBreakMinutes", "long_break_minutes"])
            .unwrap_or(defaults.long_break_minutes),
        sessions_per_set: positive_u32(value, &["sessionsPerSet", "sessions_per_set"])
            .unwrap_or(defaults.sessions_per_set),
    }
}

pub fn log(value: &Value, now: DateTime<Utc>) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = Vec::new();
    for raw in value.as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(entry) = log_entry(raw, now) else {
            continue;
        };
        if entries.iter().any(|existing| existing.id == entry.id) {
            continue;
        }
        entries.push(entry);
    }
    entries
}

pub fn log_entry(value: &Value, now: DateTime<Utc>) -> Option<LogEntry> {
    let start = timestamp(value, &["startTime", "start_time"]);
    let end = timestamp(value, &["endTime", "end_time"]);
    let (start_time, end_time) = match (start, end) {
        (None, None) => return None,
        (Some(start), Some(end)) if end >= start => (start, end),
        (Some(start), Some(_)) => (start, start),
        (Some(start), None) => (start, start),
        (None, Some(end)) => {
            let minutes = non_negative_u64(value, DURATION_KEYS).unwrap_or(0);
            (end - chrono::Duration::minutes(minutes.min(i64::MAX as u64) as i64), end)
        }
    };
    let end_time = end_time.min(now.max(start_time));
    let source_session_id = text(value, &["sourceSessionId", "source_session_id", "sessionId"]);
    let id = text(value, &["id"]).unwrap_or_else(|| {
        format!(
            "{}-{}",
            end_time.timestamp_millis(),
            source_session_id.as_deref().unwrap_or(crate::domain::models::MANUAL_SOURCE)
        )
    });

    // A stored duration within a minute of the timestamps is kept as logged.
    let derived = logged_duration_minutes(start_time, end_time);
    let duration_minutes = match positive_u32(value, DURATION_KEYS) {
        Some(stored) if stored.abs_diff(derived) <= 1 => stored,
        _ => derived,
    };

    Some(LogEntry {
        id,
        start_time,
        end_time,
        duration_minutes,
        project_label: text(value, &["projectLabel", "project_label", "project"]),
        summary: text(value, &["summary"]),
        source_session_id,
    })
}

pub fn active_sessions(value: &Value, now: DateTime<Utc>) -> Vec<ActiveSession> {
    let mut sessions: Vec<ActiveSession> = Vec::new();
    for (index, raw) in value.as_array().map(Vec::as_slice).unwrap_or_default().iter().enumerate() {
        let session = active_session(raw, index, now);
        if sessions.iter().any(|existing| existing.id == session.id) {
            continue;
        }
        sessions.push(session);
    }
    sessions
}

pub fn active_session(value: &Value, index: usize, now: DateTime<Utc>) -> ActiveSession {
    let id = text(value, &["id"])
        .unwrap_or_else(|| format!("session-{}-{index}", now.timestamp_millis()));
    let project_label = text(value, &["projectLabel", "project_label", "project"])
        .unwrap_or_else(|| UNTITLED_PROJECT.to_string());
    let interval_kind = field(value, &["intervalKind", "interval_kind", "mode"])
        .and_then(Value::as_str)
        .and_then(IntervalKind::parse)
        .unwrap_or(IntervalKind::Work);
    let mut anchor = timestamp(
        value,
        &["workIntervalStartTimestamp", "work_interval_start_timestamp"],
    );
    if interval_kind.is_break() {
        anchor = None;
    }
    let elapsed = non_negative_u64(
        value,
        &["elapsedOrRemainingSeconds", "elapsed_or_remaining_seconds", "seconds"],
    )
    .unwrap_or(0);
    let is_running = field(value, &["isRunning", "is_running"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    // A running work interval needs an anchor to survive suspension.
    if interval_kind == IntervalKind::Work && is_running && anchor.is_none() {
        anchor = Some(now - chrono::Duration::seconds(elapsed.min(i64::MAX as u64) as i64));
    }

    ActiveSession {
        id,
        project_label,
        tasks: tasks(field(value, &["tasks"]).unwrap_or(&Value::Null), now),
        interval_kind,
        elapsed_or_remaining_seconds: elapsed,
        is_running,
        completed_work_intervals_in_set: non_negative_u64(
            value,
            &["completedWorkIntervalsInSet", "completed_work_intervals_in_set"],
        )
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
        .unwrap_or(0),
        work_interval_start_timestamp: anchor,
    }
}

fn tasks(value: &Value, now: DateTime<Utc>) -> Vec<Task> {
    value
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let text = text(raw, &["text", "title"])?;
            Some(Task {
                id: text_field(raw, "id")
                    .unwrap_or_else(|| format!("task-{}-{index}", now.timestamp_millis())),
                text,
                completed: field(raw, &["completed", "done"])
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

pub fn recent_projects(value: &Value, limit: usize) -> Vec<String> {
    let labels = value
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    recent_projects::sanitize(&labels, limit)
}

pub fn remote_document(value: &Value, now: DateTime<Utc>, recent_limit: usize) -> RemoteDocument {
    RemoteDocument {
        settings: settings(field(value, &["settings"]).unwrap_or(&Value::Null)),
        log: log(field(value, &["log"]).unwrap_or(&Value::Null), now),
        active_sessions: active_sessions(
            field(value, &["activeSessions", "active_sessions"]).unwrap_or(&Value::Null),
            now,
        ),
        recent_projects: recent_projects(
            field(value, &["recentProjects", "recent_projects"]).unwrap_or(&Value::Null),
            recent_limit,
        ),
        last_updated: timestamp(value, &["lastUpdated", "last_updated"]),
    }
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|candidate| !candidate.is_null())
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    text(value, &[key])
}

fn text(value: &Value, keys: &[&str]) -> Option<String> {
    field(value, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(ToOwned::to_owned)
}

fn non_negative_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    let raw = field(value, keys)?;
    raw.as_u64()
        .or_else(|| {
            raw.as_f64()
                .filter(|number| number.is_finite() && *number >= 0.0)
                .map(|number| number as u64)
        })
        .or_else(|| raw.as_str().and_then(|candidate| candidate.trim().parse::<u64>().ok()))
}

fn positive_u32(value: &Value, keys: &[&str]) -> Option<u32> {
    non_negative_u64(value, keys)
        .and_then(|number| u32::try_from(number).ok())
        .filter(|number| *number > 0)
}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn timestamp(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = field(value, keys)?;
    if let Some(millis) = raw.as_i64() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    if let Some(millis) = raw.as_f64() {
        return Utc.timestamp_millis_opt(millis as i64).single();
    }
    raw.as_str()
        .and_then(|candidate| DateTime::parse_from_rfc3339(candidate.trim()).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}
