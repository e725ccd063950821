use crate::domain::models::{AccountState, ActiveSession, LogEntry};
use crate::infrastructure::text_generation::{CannedTextGenerator, TextGenerator};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which text features the current account may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextCapabilities {
    pub generated_text: bool,
}

impl TextCapabilities {
    pub fn for_account(account: &AccountState) -> Self {
        Self {
            generated_text: account.is_authenticated() && account.is_premium,
        }
    }
}

/// Front for the text generation collaborator. Every call degrades to local
/// text when generation is unavailable or fails.
pub struct SummaryService<G: TextGenerator> {
    generator: Arc<G>,
    capabilities: TextCapabilities,
    quote_seed: AtomicUsize,
}

impl<G: TextGenerator> SummaryService<G> {
    pub fn new(generator: Arc<G>, capabilities: TextCapabilities) -> Self {
        Self {
            generator,
            capabilities,
            quote_seed: AtomicUsize::new(0),
        }
    }

    pub fn set_capabilities(&mut self, capabilities: TextCapabilities) {
        self.capabilities = capabilities;
    }

    /// Label for a finished session: generated from its completed tasks when
    /// allowed, otherwise the label the user typed.
    pub async fn project_label_for(
        &self,
        session: &ActiveSession,
        description: Option<&str>,
    ) -> String {
        if !self.capabilities.generated_text {
            return session.project_label.clone();
        }
        let completed = session.completed_task_texts();
        match self.generator.summarize_session(&completed, description).await {
            Ok(label) if !label.trim().is_empty() => label.trim().to_string(),
            Ok(_) => session.project_label.clone(),
            Err(error) => {
                tracing::warn!(
                    session_id = %session.id,
                    error = %error,
                    "session summary unavailable"
                );
                session.project_label.clone()
            }
        }
    }

    pub async fn period_summary(&self, entries: &[LogEntry]) -> String {
        if !self.capabilities.generated_text {
            return CannedTextGenerator::period_message(entries);
        }
        match self.generator.summarize_period(entries).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => CannedTextGenerator::period_message(entries),
            Err(error) => {
                tracing::warn!(error = %error, "period summary unavailable");
                CannedTextGenerator::period_message(entries)
            }
        }
    }

    pub async fn quote(&self) -> String {
        let fallback = || {
            let seed = self.quote_seed.fetch_add(1, Ordering::Relaxed);
            CannedTextGenerator::quote_for(seed).to_string()
        };
        if !self.capabilities.generated_text {
            return fallback();
        }
        match self.generator.motivational_quote().await {
            Ok(quote) if !quote.trim().is_empty() => quote,
            Ok(_) => fallback(),
            Err(error) => {
                tracing::warn!(error = %error, "quote unavailable");
                fallback()
            }
        }
    }
}
