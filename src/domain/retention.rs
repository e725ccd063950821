use crate::domain::models::LogEntry;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const FREE_TIER_RETENTION_DAYS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub free_tier_days: u32,
    pub timezone: Tz,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            free_tier_days: FREE_TIER_RETENTION_DAYS,
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionView {
    pub displayed: Vec<LogEntry>,
    pub history_exceeds_free_limit: bool,
}

impl RetentionPolicy {
    /// Start of the oldest local calendar day still visible on the free tier.
    /// Today always counts as one of the retained days.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let days_back = i64::from(self.free_tier_days.max(1) - 1);
        let local_today = now.with_timezone(&self.timezone).date_naive();
        let first_day = local_today - Duration::days(days_back);
        let midnight = first_day.and_time(NaiveTime::default());
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|value| value.with_timezone(&Utc))
            // Midnight skipped by a DST jump: fall back to treating it as UTC.
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }

    pub fn is_within_window(&self, entry: &LogEntry, now: DateTime<Utc>) -> bool {
        entry.end_time >= self.cutoff(now)
    }

    pub fn displayed_log(
        &self,
        full_log: &[LogEntry],
        is_premium: bool,
        now: DateTime<Utc>,
    ) -> Vec<LogEntry> {
        if is_premium {
            return full_log.to_vec();
        }
        let cutoff = self.cutoff(now);
        full_log
            .iter()
            .filter(|entry| entry.end_time >= cutoff)
            .cloned()
            .collect()
    }

    /// Looks at the unfiltered log, never the displayed one.
    pub fn history_exceeds_free_limit(&self, full_log: &[LogEntry], now: DateTime<Utc>) -> bool {
        let cutoff = self.cutoff(now);
        full_log.iter().any(|entry| entry.end_time < cutoff)
    }

    pub fn evaluate(
        &self,
        full_log: &[LogEntry],
        is_premium: bool,
        now: DateTime<Utc>,
    ) -> RetentionView {
        RetentionView {
            displayed: self.displayed_log(full_log, is_premium, now),
            history_exceeds_free_limit: !is_premium
                && self.history_exceeds_free_limit(full_log, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn entry_ending(id: &str, end: DateTime<Utc>) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            start_time: end - Duration::minutes(25),
            end_time: end,
            duration_minutes: 25,
            project_label: Some("Q3".to_string()),
            summary: None,
            source_session_id: None,
        }
    }

    #[test]
    fn free_tier_hides_old_entries_and_flags_them() {
        let now = fixed_time("2026-02-16T15:00:00Z");
        let log = vec![
            entry_ending("old", now - Duration::days(10)),
            entry_ending("today", now - Duration::hours(1)),
        ];
        let policy = RetentionPolicy::default();

        let free = policy.evaluate(&log, false, now);
        assert_eq!(free.displayed.len(), 1);
        assert_eq!(free.displayed[0].id, "today");
        assert!(free.history_exceeds_free_limit);

        let premium = policy.evaluate(&log, true, now);
        assert_eq!(premium.displayed.len(), 2);
        assert!(!premium.history_exceeds_free_limit);
    }

    #[test]
    fn window_includes_whole_oldest_day() {
        let policy = RetentionPolicy::default();
        let now = fixed_time("2026-02-16T00:30:00Z");
        assert_eq!(policy.cutoff(now), fixed_time("2026-02-14T00:00:00Z"));

        let early_morning = entry_ending("edge", fixed_time("2026-02-14T00:05:00Z"));
        let day_before = entry_ending("gone", fixed_time("2026-02-13T23:59:00Z"));
        assert!(policy.is_within_window(&early_morning, now));
        assert!(!policy.is_within_window(&day_before, now));
    }

    #[test]
    fn cutoff_follows_configured_timezone() {
        let policy = RetentionPolicy {
            free_tier_days: 3,
            timezone: chrono_tz::Asia::Tokyo,
        };
        // 2026-02-16 08:00 in Tokyo.
        let now = fixed_time("2026-02-15T23:00:00Z");
        // Local midnight of 2026-02-14 in Tokyo is 2026-02-13T15:00Z.
        assert_eq!(policy.cutoff(now), fixed_time("2026-02-13T15:00:00Z"));
    }

    #[test]
    fn flag_is_false_when_everything_is_recent() {
        let now = fixed_time("2026-02-16T15:00:00Z");
        let log = vec![entry_ending("today", now)];
        assert!(!RetentionPolicy::default().history_exceeds_free_limit(&log, now));
    }
}
