use crate::domain::recent_projects::DEFAULT_RECENT_PROJECTS_LIMIT;
use crate::domain::retention::{RetentionPolicy, FREE_TIER_RETENTION_DAYS};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_UNDO_GRACE_SECONDS: u64 = 5;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 15;
const DEFAULT_COLLECTION: &str = "users";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub collection: String,
    pub poll_interval: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            collection: DEFAULT_COLLECTION.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub timezone: Tz,
    pub retention_days: u32,
    pub undo_grace: Duration,
    pub recent_projects_limit: usize,
    pub remote: RemoteConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            retention_days: FREE_TIER_RETENTION_DAYS,
            undo_grace: Duration::from_secs(DEFAULT_UNDO_GRACE_SECONDS),
            recent_projects_limit: DEFAULT_RECENT_PROJECTS_LIMIT,
            remote: RemoteConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            free_tier_days: self.retention_days,
            timezone: self.timezone,
        }
    }

    /// Remote document key for an account, e.g. `users/acct-1`.
    pub fn document_key(&self, account_id: &str) -> String {
        format!("{}/{}", self.remote.collection.trim_matches('/'), account_id.trim())
    }
}

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "PomoFlow",
        "timezone": "UTC",
        "retentionDays": FREE_TIER_RETENTION_DAYS,
        "undoGraceSeconds": DEFAULT_UNDO_GRACE_SECONDS,
        "recentProjectsLimit": DEFAULT_RECENT_PROJECTS_LIMIT,
        "remote": {
            "baseUrl": null,
            "collection": DEFAULT_COLLECTION,
            "pollIntervalSeconds": DEFAULT_POLL_INTERVAL_SECONDS
        }
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_engine_config(config_dir: &Path) -> Result<EngineConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let app = read_config(&path)?;
    parse_engine_config(&app, &path)
}

fn parse_engine_config(app: &serde_json::Value, path: &Path) -> Result<EngineConfig, InfraError> {
    let defaults = EngineConfig::default();

    let timezone = match read_str(app, "timezone") {
        Some(name) => name.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid timezone '{name}' in {}: {error}",
                path.display()
            ))
        })?,
        None => defaults.timezone,
    };
    let retention_days = match app.get("retentionDays").and_then(serde_json::Value::as_u64) {
        Some(0) => {
            return Err(InfraError::InvalidConfig(format!(
                "retentionDays must be > 0 in {}",
                path.display()
            )));
        }
        Some(days) => u32::try_from(days).unwrap_or(u32::MAX),
        None => defaults.retention_days,
    };
    let undo_grace = app
        .get("undoGraceSeconds")
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_secs)
        .unwrap_or(defaults.undo_grace);
    let recent_projects_limit = app
        .get("recentProjectsLimit")
        .and_then(serde_json::Value::as_u64)
        .filter(|limit| *limit > 0)
        .map(|limit| usize::try_from(limit).unwrap_or(DEFAULT_RECENT_PROJECTS_LIMIT))
        .unwrap_or(defaults.recent_projects_limit);

    let remote_section = app.get("remote").cloned().unwrap_or(serde_json::Value::Null);
    let remote = RemoteConfig {
        base_url: read_str(&remote_section, "baseUrl").map(ToOwned::to_owned),
        collection: read_str(&remote_section, "collection")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.remote.collection),
        poll_interval: remote_section
            .get("pollIntervalSeconds")
            .and_then(serde_json::Value::as_u64)
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.remote.poll_interval),
    };

    Ok(EngineConfig {
        timezone,
        retention_days,
        undo_grace,
        recent_projects_limit,
        remote,
    })
}

fn read_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
