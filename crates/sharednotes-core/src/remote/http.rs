//! HTTP remote store
//!
//! Talks to the shared-notes server:
//!
//! - `GET  {server}/notes/{title}` returns `{title, content, version, ...}`
//! - `PUT  {server}/notes/{title}` with body `{title, content, version}`
//! - `GET  {server}/echo/{msg}` returns `{"message": msg}` (diagnostics)
//!
//! Titles are percent-encoded as a single path segment, so spaces become
//! `%20`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::RemoteStore;
use crate::config::Config;
use crate::models::Note;
use crate::sync::{SyncError, SyncResult};

/// Remote store backed by the shared-notes HTTP API
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
}

impl HttpRemoteStore {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let base_url =
            Url::parse(base_url).map_err(|_| SyncError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sharednotes/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Create a client from the configured server URL and timeout
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        Self::new(&config.server_url, config.request_timeout())
    }

    /// The server base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Round-trip a message through the server's echo endpoint
    ///
    /// Returns the raw response body.
    pub async fn echo(&self, msg: &str) -> SyncResult<String> {
        let url = endpoint_url(&self.base_url, &["echo", msg])?;
        debug!(%url, "GET echo");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Transport(format!("echo returned {}", status)));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, title: &str) -> SyncResult<Note> {
        let url = note_url(&self.base_url, title)?;
        debug!(%url, "GET note");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound {
                title: title.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "GET '{}' returned {}",
                title, status
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|source| SyncError::MalformedResponse {
            title: title.to_string(),
            source,
        })
    }

    async fn put(&self, note: &Note) -> SyncResult<()> {
        let url = note_url(&self.base_url, &note.title)?;
        debug!(%url, version = note.version, "PUT note");

        let body = serde_json::to_string(note)
            .map_err(|e| SyncError::Transport(format!("Failed to encode note: {}", e)))?;

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "PUT '{}' returned {}",
                note.title, status
            )));
        }

        Ok(())
    }
}

/// Build the URL addressing a note by title
pub fn note_url(base: &Url, title: &str) -> SyncResult<Url> {
    endpoint_url(base, &["notes", title])
}

fn endpoint_url(base: &Url, segments: &[&str]) -> SyncResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
