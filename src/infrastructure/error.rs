use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("log entry not found: {0}")]
    LogEntryNotFound(String),
    #[error("remote document does not exist: {0}")]
    RemoteDocumentMissing(String),
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("credential error: {0}")]
    Credential(String),
    #[error("text generation error: {0}")]
    TextGeneration(String),
}

impl InfraError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Network and auth failures that the sync layer absorbs instead of surfacing.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RemoteDocumentMissing(_) => true,
            Self::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
                    || message.contains("unauthenticated")
            }
            _ => false,
        }
    }
}
