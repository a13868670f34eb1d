//! Backend collaborator: where reconciled text is synced and notes are saved.
//!
//! The engine never calls the backend itself. It emits [`Effect`]s and the
//! host hands them to a [`NoteBackend`] through [`deliver`], which logs and
//! swallows failures. Local document state is never rolled back because a
//! save failed; the next debounced or periodic save retries implicitly.
//!
//! Implementations:
//! - `InMemoryBackend` - For testing
//! - `HttpBackend` (in scribe-daemon) - Uses the REST endpoints

use crate::blocks::{Block, NoteInfo};
use crate::engine::Effect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend rejected request: {status} {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Response(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Why a save was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    DefiniteUtterance,
    EditComplete,
    Summary,
    Manual,
    Periodic,
}

/// Metadata stored alongside the flattened text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub blocks: Vec<Block>,
    pub note_info: Option<NoteInfo>,
    pub block_count: usize,
    pub trigger: SaveTrigger,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub session_id: String,
}

/// Body of a save request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePayload {
    pub text: String,
    pub app_type: String,
    pub metadata: SaveMetadata,
    /// Existing record to update; `None` creates a new record.
    #[serde(skip)]
    pub record_id: Option<String>,
}

/// Persistence endpoint for reconciled notes.
#[async_trait]
pub trait NoteBackend: Send + Sync {
    /// Push the current reconciled text while recording.
    async fn sync_edit(&self, text: &str) -> Result<()>;

    /// Create or update a record. Returns the record id.
    async fn save(&self, payload: &SavePayload) -> Result<String>;
}

/// Hand one effect to the backend.
///
/// Failures are logged and dropped. Returns the record id when a save
/// succeeded, so the host can feed it back to the engine.
pub async fn deliver(backend: &dyn NoteBackend, effect: &Effect) -> Option<String> {
    match effect {
        Effect::Sync { text } => {
            if let Err(e) = backend.sync_edit(text).await {
                warn!("Backend sync failed: {}", e);
            }
            None
        }
        Effect::Save(payload) => match backend.save(payload).await {
            Ok(record_id) => {
                debug!(
                    "Saved record {} ({:?}, {} blocks)",
                    record_id, payload.metadata.trigger, payload.metadata.block_count
                );
                Some(record_id)
            }
            Err(e) => {
                warn!("Backend save failed ({:?}): {}", payload.metadata.trigger, e);
                None
            }
        },
    }
}

/// Records every call; optionally fails them all.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    syncs: RwLock<Vec<String>>,
    saves: RwLock<Vec<SavePayload>>,
    fail: RwLock<bool>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn syncs(&self) -> Vec<String> {
        self.syncs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn saves(&self) -> Vec<SavePayload> {
        self.saves.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn failing(&self) -> bool {
        *self.fail.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NoteBackend for InMemoryBackend {
    async fn sync_edit(&self, text: &str) -> Result<()> {
        if self.failing() {
            return Err(BackendError::Request("connection refused".into()));
        }
        self.syncs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }

    async fn save(&self, payload: &SavePayload) -> Result<String> {
        if self.failing() {
            return Err(BackendError::Rejected {
                status: 503,
                message: "unavailable".into(),
            });
        }
        let mut saves = self.saves.write().unwrap_or_else(|e| e.into_inner());
        saves.push(payload.clone());
        Ok(payload
            .record_id
            .clone()
            .unwrap_or_else(|| format!("record-{}", saves.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(record_id: Option<&str>) -> SavePayload {
        SavePayload {
            text: "hello".into(),
            app_type: "voice-note".into(),
            metadata: SaveMetadata {
                blocks: Vec::new(),
                note_info: None,
                block_count: 0,
                trigger: SaveTrigger::Manual,
                timestamp: 1,
                session_id: "s".into(),
            },
            record_id: record_id.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_deliver_records_calls() {
        let backend = InMemoryBackend::new();
        let sync = Effect::Sync {
            text: "draft".into(),
        };
        assert!(deliver(&backend, &sync).await.is_none());
        assert_eq!(backend.syncs(), vec!["draft".to_string()]);

        let id = deliver(&backend, &Effect::Save(payload(None))).await;
        assert_eq!(id.as_deref(), Some("record-1"));

        let id = deliver(&backend, &Effect::Save(payload(Some("r-9")))).await;
        assert_eq!(id.as_deref(), Some("r-9"));
    }

    #[tokio::test]
    async fn test_deliver_swallows_failures() {
        let backend = InMemoryBackend::new();
        backend.set_failing(true);

        assert!(deliver(&backend, &Effect::Save(payload(None))).await.is_none());
        assert!(backend.saves().is_empty());
    }

    #[test]
    fn test_payload_wire_shape() {
        let json = serde_json::to_value(payload(Some("r-1"))).unwrap();
        assert_eq!(json["app_type"], "voice-note");
        assert_eq!(json["metadata"]["trigger"], "manual");
        assert!(json.get("record_id").is_none());
    }
}
