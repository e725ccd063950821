use crate::domain::models::{ActiveSession, IntervalKind, Settings};
use chrono::{DateTime, Utc};

/// Break earned after `completed` work intervals.
pub fn next_break_kind(completed: u32, settings: &Settings) -> IntervalKind {
    let per_set = settings.sessions_per_set.max(1);
    if completed > 0 && completed % per_set == 0 {
        IntervalKind::LongBreak
    } else {
        IntervalKind::ShortBreak
    }
}

pub fn break_duration_seconds(kind: IntervalKind, settings: &Settings) -> u64 {
    let minutes = match kind {
        IntervalKind::Work => 0,
        IntervalKind::ShortBreak => settings.short_break_minutes,
        IntervalKind::LongBreak => settings.long_break_minutes,
    };
    u64::from(minutes) * 60
}

/// Work seconds accumulated since `anchor`, clamped at zero.
pub fn elapsed_since(anchor: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - anchor).num_seconds().max(0) as u64
}

pub fn reset_to_fresh_work(session: &mut ActiveSession) {
    session.interval_kind = IntervalKind::Work;
    session.elapsed_or_remaining_seconds = 0;
    session.work_interval_start_timestamp = None;
    session.is_running = false;
}

/// Counts the finished work interval and resets the session, returning the break it earned.
pub fn complete_work_interval(session: &mut ActiveSession, settings: &Settings) -> IntervalKind {
    session.completed_work_intervals_in_set =
        session.completed_work_intervals_in_set.saturating_add(1);
    reset_to_fresh_work(session);
    next_break_kind(session.completed_work_intervals_in_set, settings)
}

pub fn begin_break(session: &mut ActiveSession, kind: IntervalKind, settings: &Settings) {
    debug_assert!(kind.is_break());
    session.interval_kind = kind;
    session.elapsed_or_remaining_seconds = break_duration_seconds(kind, settings);
    session.work_interval_start_timestamp = None;
    session.is_running = true;
}

pub fn finish_break(session: &mut ActiveSession) {
    reset_to_fresh_work(session);
}

/// Advances a session by `seconds` of running time. Returns true when a break
/// ran out and the session switched back to work during this call.
pub fn advance(session: &mut ActiveSession, seconds: u64) -> bool {
    if !session.is_running {
        return false;
    }
    match session.interval_kind {
        IntervalKind::Work => {
            session.elapsed_or_remaining_seconds =
                session.elapsed_or_remaining_seconds.saturating_add(seconds);
            false
        }
        IntervalKind::ShortBreak | IntervalKind::LongBreak => {
            session.elapsed_or_remaining_seconds =
                session.elapsed_or_remaining_seconds.saturating_sub(seconds);
            if session.elapsed_or_remaining_seconds == 0 {
                finish_break(session);
                return true;
            }
            false
        }
    }
}
