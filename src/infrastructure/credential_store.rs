use crate::domain::models::AccountState;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Signed-in account as handed over by the authentication collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSession {
    pub account_id: String,
    pub access_token: String,
    pub is_premium: bool,
}

impl AccountSession {
    pub fn account_state(&self) -> AccountState {
        AccountState::signed_in(self.account_id.clone(), self.is_premium)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.account_id.trim().is_empty() {
            return Err("account.account_id must not be empty".to_string());
        }
        if self.access_token.trim().is_empty() {
            return Err("account.access_token must not be empty".to_string());
        }
        Ok(())
    }
}

pub trait CredentialStore: Send + Sync {
    fn save_session(&self, session: &AccountSession) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<AccountSession>, InfraError>;
    fn delete_session(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("pomoflow.account", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_session(&self, session: &AccountSession) -> Result<(), InfraError> {
        session.validate().map_err(InfraError::Credential)?;
        let payload = serde_json::to_string(session)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_session(&self) -> Result<Option<AccountSession>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        match serde_json::from_str::<AccountSession>(&payload) {
            Ok(session) if session.validate().is_ok() => Ok(Some(session)),
            Ok(_) | Err(_) => {
                tracing::warn!("stored account session is unreadable; treating as signed out");
                Ok(None)
            }
        }
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    session: Mutex<Option<AccountSession>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_session(&self, session: &AccountSession) -> Result<(), InfraError> {
        session.validate().map_err(InfraError::Credential)?;
        let mut guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<AccountSession>, InfraError> {
        let guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
