use crate::domain::models::LogEntry;
use std::collections::HashMap;

pub const UNLABELLED_PROJECT: &str = "(no project)";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectTotal {
    pub project_label: String,
    pub minutes: u64,
    pub entries: usize,
}

/// Aggregate totals over a set of log entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogStats {
    pub entry_count: usize,
    pub total_minutes: u64,
    /// Largest first; ties keep label order.
    pub by_project: Vec<ProjectTotal>,
}

impl LogStats {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let mut totals: HashMap<String, ProjectTotal> = HashMap::new();
        for entry in entries {
            let label = entry
                .project_label
                .as_deref()
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .unwrap_or(UNLABELLED_PROJECT);
            let total = totals.entry(label.to_string()).or_insert_with(|| ProjectTotal {
                project_label: label.to_string(),
                ..ProjectTotal::default()
            });
            total.minutes += u64::from(entry.duration_minutes);
            total.entries += 1;
        }

        let mut by_project = totals.into_values().collect::<Vec<_>>();
        by_project.sort_by(|left, right| {
            right
                .minutes
                .cmp(&left.minutes)
                .then_with(|| left.project_label.cmp(&right.project_label))
        });

        Self {
            entry_count: entries.len(),
            total_minutes: entries.iter().map(|entry| u64::from(entry.duration_minutes)).sum(),
            by_project,
        }
    }

    pub fn top_project(&self) -> Option<&ProjectTotal> {
        self.by_project.first()
    }
}
