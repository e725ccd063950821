use crate::domain::models::RemoteDocument;
use crate::domain::normalize;
use crate::domain::recent_projects::DEFAULT_RECENT_PROJECTS_LIMIT;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_store::{DocumentPatch, RemoteDocumentStore};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// REST document store: `GET`/`PATCH`/`PUT` on `{base}/documents/{key}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteDocumentStore {
    client: Client,
    base_url: Url,
    access_token: String,
    poll_interval: Duration,
}

impl HttpRemoteDocumentStore {
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid remote base url: {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "remote base url cannot be a base".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let access_token = access_token.into();
        Self::ensure_non_empty(&access_token, "access token")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            access_token,
            poll_interval,
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::invalid_input(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return InfraError::Remote(format!("unauthenticated: http {}", status.as_u16()));
        }
        if status.is_server_error() {
            return InfraError::Remote(format!(
                "remote store temporarily unavailable: http {}",
                status.as_u16()
            ));
        }
        if body.trim().is_empty() {
            InfraError::Remote(format!("remote store error: http {}", status.as_u16()))
        } else {
            InfraError::Remote(format!("remote store error: http {}; body={body}", status.as_u16()))
        }
    }

    fn document_endpoint(&self, key: &str) -> Result<Url, InfraError> {
        Self::ensure_non_empty(key, "document key")?;
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("remote base url cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("documents");
            for segment in key.split('/').map(str::trim).filter(|value| !value.is_empty()) {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    async fn fetch(&self, key: &str) -> Result<Option<RemoteDocument>, InfraError> {
        let endpoint = self.document_endpoint(key)?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(network_error("reading document"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(network_error("reading document body"))?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        parse_document(&body).map(Some)
    }
}

fn network_error(action: &'static str) -> impl FnOnce(reqwest::Error) -> InfraError {
    move |error| InfraError::Remote(format!("network error while {action}: {error}"))
}

/// Decodes a document body, repairing missing or malformed fields.
pub fn parse_document(body: &str) -> Result<RemoteDocument, InfraError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|error| InfraError::Remote(format!("invalid document payload: {error}")))?;
    Ok(normalize::remote_document(&value, Utc::now(), DEFAULT_RECENT_PROJECTS_LIMIT))
}

#[async_trait]
impl RemoteDocumentStore for HttpRemoteDocumentStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteDocument>, InfraError> {
        self.fetch(key).await
    }

    async fn merge_update(&self, key: &str, patch: &DocumentPatch) -> Result<(), InfraError> {
        let endpoint = self.document_endpoint(key)?;
        let response = self
            .client
            .patch(endpoint)
            .bearer_auth(&self.access_token)
            .json(&patch.to_value()?)
            .send()
            .await
            .map_err(network_error("updating document"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(network_error("reading update response"))?;

        if status == StatusCode::NOT_FOUND {
            return Err(InfraError::RemoteDocumentMissing(key.trim().to_string()));
        }
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(())
    }

    async fn create_or_overwrite(
        &self,
        key: &str,
        document: &RemoteDocument,
    ) -> Result<(), InfraError> {
        let endpoint = self.document_endpoint(key)?;
        let response = self
            .client
            .put(endpoint)
            .bearer_auth(&self.access_token)
            .json(document)
            .send()
            .await
            .map_err(network_error("writing document"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(network_error("reading write response"))?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<RemoteDocument>, InfraError> {
        Self::ensure_non_empty(key, "document key")?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let store = self.clone();
        let key = key.trim().to_string();

        // The endpoint has no push channel, so changes are detected by polling `lastUpdated`.
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            let mut last_seen: Option<RemoteDocument> = None;
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                match store.fetch(&key).await {
                    Ok(Some(document)) => {
                        let changed = last_seen.as_ref().is_none_or(|previous| {
                            previous.last_updated != document.last_updated || previous != &document
                        });
                        if changed {
                            last_seen = Some(document.clone());
                            if sender.send(document).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(key = %key, error = %error, "remote snapshot poll failed");
                    }
                }
            }
        });

        Ok(receiver)
    }
}
