use crate::domain::models::LogEntry;
use chrono::{DateTime, Utc};

/// Deleted entry held back from the remote store until its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub entry: LogEntry,
    /// Position in the full log before removal, so undo restores ordering.
    pub index: usize,
    pub deadline: DateTime<Utc>,
    pub token: u64,
}

#[derive(Debug, Default)]
pub struct UndoDeleteManager {
    pending: Option<PendingDeletion>,
    next_token: u64,
}

impl UndoDeleteManager {
    pub fn pending(&self) -> Option<&PendingDeletion> {
        self.pending.as_ref()
    }

    pub fn pending_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.entry.id.as_str())
    }

    /// Holds `entry` for undo. A deletion already in flight is handed back so
    /// the caller can finalize it immediately.
    pub fn begin(
        &mut self,
        entry: LogEntry,
        index: usize,
        deadline: DateTime<Utc>,
    ) -> (u64, Option<PendingDeletion>) {
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        let previous = self.pending.replace(PendingDeletion {
            entry,
            index,
            deadline,
            token,
        });
        (token, previous)
    }

    /// Takes the pending deletion back if its window is still open.
    pub fn take_for_undo(&mut self, now: DateTime<Utc>) -> Option<PendingDeletion> {
        match &self.pending {
            Some(pending) if now < pending.deadline => self.pending.take(),
            _ => None,
        }
    }

    /// Takes the pending deletion for finalization. Stale tokens from an
    /// undone or superseded deletion return nothing.
    pub fn take_due(&mut self, token: u64) -> Option<PendingDeletion> {
        match &self.pending {
            Some(pending) if pending.token == token => self.pending.take(),
            _ => None,
        }
    }

    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Option<PendingDeletion> {
        match &self.pending {
            Some(pending) if now >= pending.deadline => self.pending.take(),
            _ => None,
        }
    }

    pub fn take_any(&mut self) -> Option<PendingDeletion> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_entry(id: &str) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            start_time: fixed_time() - Duration::minutes(25),
            end_time: fixed_time(),
            duration_minutes: 25,
            project_label: None,
            summary: None,
            source_session_id: None,
        }
    }

    #[test]
    fn undo_inside_window_returns_entry() {
        let mut manager = UndoDeleteManager::default();
        let deadline = fixed_time() + Duration::seconds(5);
        let (_, previous) = manager.begin(sample_entry("entry-1"), 0, deadline);
        assert!(previous.is_none());
        assert_eq!(manager.pending_id(), Some("entry-1"));

        let restored = manager
            .take_for_undo(fixed_time() + Duration::seconds(4))
            .expect("undo inside window");
        assert_eq!(restored.entry.id, "entry-1");
        assert!(manager.pending().is_none());
    }

    #[test]
    fn undo_after_deadline_is_refused() {
        let mut manager = UndoDeleteManager::default();
        let deadline = fixed_time() + Duration::seconds(5);
        manager.begin(sample_entry("entry-1"), 0, deadline);

        assert!(manager.take_for_undo(deadline).is_none());
        assert!(manager.take_expired(deadline).is_some());
    }

    #[test]
    fn new_deletion_supersedes_the_previous_one() {
        let mut manager = UndoDeleteManager::default();
        let deadline = fixed_time() + Duration::seconds(5);
        let (first_token, _) = manager.begin(sample_entry("entry-1"), 0, deadline);
        let (second_token, previous) = manager.begin(sample_entry("entry-2"), 1, deadline);

        assert_ne!(first_token, second_token);
        assert_eq!(previous.map(|pending| pending.entry.id), Some("entry-1".to_string()));
        assert!(manager.take_due(first_token).is_none());
        assert_eq!(manager.take_due(second_token).map(|pending| pending.index), Some(1));
    }
}
