use crate::domain::models::LogEntry;
use crate::domain::stats::LogStats;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short project label describing what a finished session achieved.
    async fn summarize_session(
        &self,
        completed_task_texts: &[String],
        description: Option<&str>,
    ) -> Result<String, InfraError>;

    /// Prose recap of a set of log entries.
    async fn summarize_period(&self, entries: &[LogEntry]) -> Result<String, InfraError>;

    async fn motivational_quote(&self) -> Result<String, InfraError>;
}

const CANNED_QUOTES: [&str; 4] = [
    "Small steps every day add up.",
    "Focus on the next twenty-five minutes.",
    "Done is better than perfect.",
    "Rest is part of the work.",
];

/// Offline generator used for the free tier and whenever the real service fails.
#[derive(Debug, Clone, Default)]
pub struct CannedTextGenerator;

impl CannedTextGenerator {
    pub fn period_message(entries: &[LogEntry]) -> String {
        let stats = LogStats::from_entries(entries);
        if stats.entry_count == 0 {
            return "No focus sessions logged in this period yet.".to_string();
        }
        let mut message = format!(
            "You logged {} focus session{} totalling {} minute{}.",
            stats.entry_count,
            if stats.entry_count == 1 { "" } else { "s" },
            stats.total_minutes,
            if stats.total_minutes == 1 { "" } else { "s" }
        );
        if let Some(top) = stats.top_project() {
            message.push_str(&format!(" Most time went to {}.", top.project_label));
        }
        message
    }

    pub fn quote_for(seed: usize) -> &'static str {
        CANNED_QUOTES[seed % CANNED_QUOTES.len()]
    }
}

#[async_trait]
impl TextGenerator for CannedTextGenerator {
    async fn summarize_session(
        &self,
        completed_task_texts: &[String],
        description: Option<&str>,
    ) -> Result<String, InfraError> {
        let description = description.map(str::trim).filter(|value| !value.is_empty());
        match (description, completed_task_texts.first()) {
            (Some(description), _) => Ok(description.to_string()),
            (None, Some(first)) => Ok(first.trim().to_string()),
            (None, None) => Err(InfraError::TextGeneration(
                "nothing to summarize".to_string(),
            )),
        }
    }

    async fn summarize_period(&self, entries: &[LogEntry]) -> Result<String, InfraError> {
        Ok(Self::period_message(entries))
    }

    async fn motivational_quote(&self) -> Result<String, InfraError> {
        let seed = chrono::Utc::now().timestamp().unsigned_abs() as usize;
        Ok(Self::quote_for(seed).to_string())
    }
}
