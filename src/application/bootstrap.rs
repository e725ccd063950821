use crate::application::clock::system_clock;
use crate::application::runtime::EngineRuntime;
use crate::infrastructure::config::{ensure_default_configs, load_engine_config, EngineConfig};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::SqliteLocalStore;
use crate::infrastructure::remote_http::HttpRemoteDocumentStore;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub database_path: PathBuf,
    pub logs_dir: PathBuf,
    pub config: EngineConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("pomoflow.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_engine_config(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        database_path,
        logs_dir,
        config,
    })
}

/// Starts the engine on the workspace's SQLite store. Must run inside a tokio runtime.
pub fn start_runtime(bootstrap: &BootstrapResult) -> Result<EngineRuntime, InfraError> {
    let local = Arc::new(SqliteLocalStore::new(&bootstrap.database_path));
    EngineRuntime::start(bootstrap.config.clone(), local, system_clock())
}

/// Signs the runtime back into a stored account, if there is one and a remote
/// endpoint is configured. Returns the remote document key when connected.
pub async fn resume_account(
    runtime: &mut EngineRuntime,
    credentials: &dyn CredentialStore,
    config: &EngineConfig,
) -> Result<Option<String>, InfraError> {
    let Some(session) = credentials.load_session()? else {
        return Ok(None);
    };
    let Some(base_url) = config.remote.base_url.as_deref() else {
        tracing::info!("no remote endpoint configured; account stays local-only");
        return Ok(None);
    };
    let remote = HttpRemoteDocumentStore::new(
        base_url,
        session.access_token.clone(),
        config.remote.poll_interval,
    )?;
    let key = runtime.sign_in(session.account_state(), Arc::new(remote)).await?;
    Ok(Some(key))
}
