use crate::domain::models::{ActiveSession, LogEntry, RemoteDocument, Settings};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Partial document update; `None` fields are left untouched by `merge_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPatch {
    pub settings: Option<Settings>,
    pub log: Option<Vec<LogEntry>>,
    pub active_sessions: Option<Vec<ActiveSession>>,
    pub recent_projects: Option<Vec<String>>,
    pub last_updated: DateTime<Utc>,
}

impl DocumentPatch {
    pub fn empty(last_updated: DateTime<Utc>) -> Self {
        Self {
            settings: None,
            log: None,
            active_sessions: None,
            recent_projects: None,
            last_updated,
        }
    }

    pub fn apply_to(&self, document: &mut RemoteDocument) {
        if let Some(settings) = self.settings {
            document.settings = settings;
        }
        if let Some(log) = &self.log {
            document.log = log.clone();
        }
        if let Some(active_sessions) = &self.active_sessions {
            document.active_sessions = active_sessions.clone();
        }
        if let Some(recent_projects) = &self.recent_projects {
            document.recent_projects = recent_projects.clone();
        }
        document.last_updated = Some(self.last_updated);
    }

    pub fn to_value(&self) -> Result<serde_json::Value, InfraError> {
        let mut object = serde_json::Map::new();
        if let Some(settings) = &self.settings {
            object.insert("settings".to_string(), serde_json::to_value(settings)?);
        }
        if let Some(log) = &self.log {
            object.insert("log".to_string(), serde_json::to_value(log)?);
        }
        if let Some(active_sessions) = &self.active_sessions {
            object.insert("activeSessions".to_string(), serde_json::to_value(active_sessions)?);
        }
        if let Some(recent_projects) = &self.recent_projects {
            object.insert("recentProjects".to_string(), serde_json::to_value(recent_projects)?);
        }
        object.insert(
            "lastUpdated".to_string(),
            serde_json::Value::String(self.last_updated.to_rfc3339()),
        );
        Ok(serde_json::Value::Object(object))
    }
}

#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RemoteDocument>, InfraError>;

    /// Fails with `InfraError::RemoteDocumentMissing` when no document exists at `key`.
    async fn merge_update(&self, key: &str, patch: &DocumentPatch) -> Result<(), InfraError>;

    async fn create_or_overwrite(
        &self,
        key: &str,
        document: &RemoteDocument,
    ) -> Result<(), InfraError>;

    /// Full-document snapshots for `key`, starting with the current one if it exists.
    async fn subscribe(
        &self,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<RemoteDocument>, InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRemoteDocumentStore {
    documents: Mutex<HashMap<String, RemoteDocument>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RemoteDocument>>>>,
}

impl InMemoryRemoteDocumentStore {
    fn normalized_key(key: &str) -> Result<String, InfraError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(InfraError::invalid_input("remote document key must not be empty"));
        }
        Ok(key.to_string())
    }

    fn lock_error(error: impl std::fmt::Display) -> InfraError {
        InfraError::Remote(format!("in-memory remote store lock poisoned: {error}"))
    }

    pub fn document(&self, key: &str) -> Option<RemoteDocument> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(key.trim()).cloned())
    }

    fn publish(&self, key: &str, document: &RemoteDocument) -> Result<(), InfraError> {
        let mut subscribers = self.subscribers.lock().map_err(Self::lock_error)?;
        if let Some(senders) = subscribers.get_mut(key) {
            senders.retain(|sender| sender.send(document.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentStore for InMemoryRemoteDocumentStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteDocument>, InfraError> {
        let key = Self::normalized_key(key)?;
        let documents = self.documents.lock().map_err(Self::lock_error)?;
        Ok(documents.get(&key).cloned())
    }

    async fn merge_update(&self, key: &str, patch: &DocumentPatch) -> Result<(), InfraError> {
        let key = Self::normalized_key(key)?;
        let updated = {
            let mut documents = self.documents.lock().map_err(Self::lock_error)?;
            let document = documents
                .get_mut(&key)
                .ok_or_else(|| InfraError::RemoteDocumentMissing(key.clone()))?;
            patch.apply_to(document);
            document.clone()
        };
        self.publish(&key, &updated)
    }

    async fn create_or_overwrite(
        &self,
        key: &str,
        document: &RemoteDocument,
    ) -> Result<(), InfraError> {
        let key = Self::normalized_key(key)?;
        {
            let mut documents = self.documents.lock().map_err(Self::lock_error)?;
            documents.insert(key.clone(), document.clone());
        }
        self.publish(&key, document)
    }

    async fn subscribe(
        &self,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<RemoteDocument>, InfraError> {
        let key = Self::normalized_key(key)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let current = {
            let documents = self.documents.lock().map_err(Self::lock_error)?;
            documents.get(&key).cloned()
        };
        if let Some(document) = current {
            let _ = sender.send(document);
        }
        self.subscribers
            .lock()
            .map_err(Self::lock_error)?
            .entry(key)
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}
