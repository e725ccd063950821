use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Scope used while no account is signed in.
pub const ANONYMOUS_SCOPE: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocalRecord {
    Settings,
    Log,
    ActiveSessions,
    RecentProjects,
}

impl LocalRecord {
    pub const ALL: [LocalRecord; 4] = [
        LocalRecord::Settings,
        LocalRecord::Log,
        LocalRecord::ActiveSessions,
        LocalRecord::RecentProjects,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Log => "log",
            Self::ActiveSessions => "active_sessions",
            Self::RecentProjects => "recent_projects",
        }
    }
}

pub trait LocalStore: Send + Sync {
    fn load(
        &self,
        scope: &str,
        record: LocalRecord,
    ) -> Result<Option<serde_json::Value>, InfraError>;
    fn save(
        &self,
        scope: &str,
        record: LocalRecord,
        payload: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), InfraError>;
    fn remove(&self, scope: &str, record: LocalRecord) -> Result<(), InfraError>;
}

fn normalized_scope(scope: &str) -> Result<&str, InfraError> {
    let scope = scope.trim();
    if scope.is_empty() {
        return Err(InfraError::invalid_input("local store scope must not be empty"));
    }
    Ok(scope)
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    db_path: PathBuf,
}

impl SqliteLocalStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl LocalStore for SqliteLocalStore {
    fn load(
        &self,
        scope: &str,
        record: LocalRecord,
    ) -> Result<Option<serde_json::Value>, InfraError> {
        let scope = normalized_scope(scope)?;
        let connection = self.connect()?;
        let payload: Option<String> = connection
            .query_row(
                "SELECT payload FROM local_records WHERE scope = ?1 AND record = ?2",
                params![scope, record.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                // Unparseable payloads read as absent so defaults apply.
                tracing::warn!(
                    scope,
                    record = record.as_str(),
                    error = %error,
                    "discarding corrupt local record"
                );
                Ok(None)
            }
        }
    }

    fn save(
        &self,
        scope: &str,
        record: LocalRecord,
        payload: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let scope = normalized_scope(scope)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO local_records (scope, record, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope, record) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            params![
                scope,
                record.as_str(),
                serde_json::to_string(payload)?,
                updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn remove(&self, scope: &str, record: LocalRecord) -> Result<(), InfraError> {
        let scope = normalized_scope(scope)?;
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM local_records WHERE scope = ?1 AND record = ?2",
            params![scope, record.as_str()],
        )?;
        Ok(())
    }
}

type RecordMap = HashMap<(String, LocalRecord), serde_json::Value>;

#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    records: Mutex<RecordMap>,
}

impl InMemoryLocalStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RecordMap>, InfraError> {
        self.records.lock().map_err(|error| {
            InfraError::InvalidConfig(format!("local store lock poisoned: {error}"))
        })
    }
}

impl LocalStore for InMemoryLocalStore {
    fn load(
        &self,
        scope: &str,
        record: LocalRecord,
    ) -> Result<Option<serde_json::Value>, InfraError> {
        let scope = normalized_scope(scope)?;
        Ok(self.lock()?.get(&(scope.to_string(), record)).cloned())
    }

    fn save(
        &self,
        scope: &str,
        record: LocalRecord,
        payload: &serde_json::Value,
        _updated_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let scope = normalized_scope(scope)?;
        self.lock()?.insert((scope.to_string(), record), payload.clone());
        Ok(())
    }

    fn remove(&self, scope: &str, record: LocalRecord) -> Result<(), InfraError> {
        let scope = normalized_scope(scope)?;
        self.lock()?.remove(&(scope.to_string(), record));
        Ok(())
    }
}
