//! Backend delivery off the event loop.
//!
//! The event loop hands effects to one spawned task over a channel. The task
//! delivers them strictly in order, so a save queued before the first record
//! id came back still updates that record instead of creating a second one.
//! Record ids travel back to the loop as [`SavedRecord`]s.

use scribe_core::{deliver, Effect, NoteBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A record created or updated by a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRecord {
    /// Engine session (one per note) the save came from
    pub session_id: String,
    pub record_id: String,
}

/// Handle to the delivery task.
pub struct DeliveryWorker {
    tx: Option<mpsc::UnboundedSender<Effect>>,
    task: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    /// Spawn the task. Saved records are reported on `saved_tx`.
    pub fn spawn(backend: Arc<dyn NoteBackend>, saved_tx: mpsc::UnboundedSender<SavedRecord>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::deliver_all(backend, rx, saved_tx));
        Self {
            tx: Some(tx),
            task: Some(task),
        }
    }

    /// Queue an effect. Never waits on the backend.
    pub fn submit(&self, effect: Effect) {
        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(effect).is_ok());
        if !sent {
            warn!("Delivery task is gone, dropping effect");
        }
    }

    async fn deliver_all(
        backend: Arc<dyn NoteBackend>,
        mut rx: mpsc::UnboundedReceiver<Effect>,
        saved_tx: mpsc::UnboundedSender<SavedRecord>,
    ) {
        let mut last_saved: Option<SavedRecord> = None;

        while let Some(mut effect) = rx.recv().await {
            let session_id = match &mut effect {
                Effect::Save(payload) => {
                    if payload.record_id.is_none() {
                        payload.record_id = last_saved
                            .as_ref()
                            .filter(|saved| saved.session_id == payload.metadata.session_id)
                            .map(|saved| saved.record_id.clone());
                    }
                    Some(payload.metadata.session_id.clone())
                }
                Effect::Sync { .. } => None,
            };

            let record_id = deliver(backend.as_ref(), &effect).await;
            if let (Some(session_id), Some(record_id)) = (session_id, record_id) {
                let saved = SavedRecord {
                    session_id,
                    record_id,
                };
                // The loop may already be shutting down
                let _ = saved_tx.send(saved.clone());
                last_saved = Some(saved);
            }
        }

        debug!("Delivery task finished");
    }

    /// Stop accepting effects and wait up to `grace` for queued ones.
    pub async fn drain(&mut self, grace: Duration) {
        self.tx = None;
        let Some(task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(grace, task).await {
            Ok(_) => debug!("Delivered all queued effects"),
            Err(_) => warn!("Backend still busy after {:?}, abandoning queued effects", grace),
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
