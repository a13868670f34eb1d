//! HTTP implementation of the note backend.
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /api/recording/sync-edit` with `{"text": ...}`
//! - `POST /api/text/save` creates a record, answering `{"success", "record_id"}`
//! - `PUT /api/records/{id}` updates an existing record

use async_trait::async_trait;
use scribe_core::{BackendError, NoteBackend, SavePayload};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

type Result<T> = std::result::Result<T, BackendError>;

#[derive(Serialize)]
struct SyncEditRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// REST client for the notes service.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Every request, body included, is abandoned after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn request_error(e: reqwest::Error) -> BackendError {
    match e.status() {
        Some(status) => BackendError::Rejected {
            status: status.as_u16(),
            message: e.to_string(),
        },
        None => BackendError::Request(e.to_string()),
    }
}

#[async_trait]
impl NoteBackend for HttpBackend {
    async fn sync_edit(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/recording/sync-edit"))
            .json(&SyncEditRequest { text })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?;
        debug!("Synced {} chars", text.chars().count());
        Ok(())
    }

    async fn save(&self, payload: &SavePayload) -> Result<String> {
        let request = match &payload.record_id {
            Some(id) => self.client.put(self.url(&format!("/api/records/{}", id))),
            None => self.client.post(self.url("/api/text/save")),
        };

        let response = request
            .json(payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?;

        let body: SaveResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;

        if !body.success {
            return Err(BackendError::Response(
                body.message.unwrap_or_else(|| "save not acknowledged".into()),
            ));
        }

        body.record_id
            .or_else(|| payload.record_id.clone())
            .ok_or_else(|| BackendError::Response("missing record_id".into()))
    }
}
