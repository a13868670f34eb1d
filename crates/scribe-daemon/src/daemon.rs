//! The daemon event loop.
//!
//! One task owns the reconciler. Gateway frames, editor requests, engine
//! deadlines and reconnect timers are multiplexed with `tokio::select!`.
//! Effects the engine queues are handed to the [`DeliveryWorker`] after each
//! turn, so the loop never waits on the notes service.

use crate::asr::{AsrClient, AsrEvent};
use crate::delivery::{DeliveryWorker, SavedRecord};
use crate::message::{recording_state, AsrMessage, EditorRequest, EditorUpdate};
use crate::server::{EditorServer, ServerEvent};
use anyhow::Result;
use scribe_core::{
    Effect, EngineConfig, EngineEvent, NoteBackend, Reconciler, RecordingState, Subscription,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use web_time::Instant;

/// How long shutdown waits for queued backend calls.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Daemon state holding all components.
pub struct Daemon {
    engine: Reconciler,
    server: EditorServer,
    delivery: DeliveryWorker,
    saved_rx: mpsc::UnboundedReceiver<SavedRecord>,
    asr: AsrClient,
    asr_tx: mpsc::UnboundedSender<AsrEvent>,
    asr_rx: mpsc::UnboundedReceiver<AsrEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    _subscription: Subscription,
}

impl Daemon {
    /// Spawns the delivery task, so this needs a Tokio runtime.
    pub fn new(config: EngineConfig, asr: AsrClient, backend: Arc<dyn NoteBackend>) -> Self {
        let engine = Reconciler::new(config, Instant::now());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = engine.events().subscribe(move |event| {
            let _ = events_tx.send(event);
        });

        let (asr_tx, asr_rx) = mpsc::unbounded_channel();
        let (saved_tx, saved_rx) = mpsc::unbounded_channel();

        Self {
            engine,
            server: EditorServer::new(),
            delivery: DeliveryWorker::spawn(backend, saved_tx),
            saved_rx,
            asr,
            asr_tx,
            asr_rx,
            events_rx,
            _subscription: subscription,
        }
    }

    pub fn engine(&self) -> &Reconciler {
        &self.engine
    }

    /// Run until `shutdown` resolves.
    pub async fn run(
        mut self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        self.connect_asr().await;
        tokio::pin!(shutdown);

        info!("Daemon running");

        loop {
            let engine_deadline = self.engine.next_deadline();
            let reconnect_deadline = self.asr.reconnect_deadline();

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Some(conn_id) = self.server.accept_connection(stream, addr).await {
                                self.send_snapshot(&conn_id).await;
                            }
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                Some(event) = self.server.recv_event() => {
                    self.on_server_event(event).await;
                }

                Some(event) = self.asr_rx.recv() => {
                    self.on_asr_event(event).await;
                }

                Some(saved) = self.saved_rx.recv() => {
                    self.on_saved(saved);
                }

                Some(event) = self.events_rx.recv() => {
                    debug!("Engine event: {:?}", event);
                    // Coalesce a burst into one snapshot
                    while self.events_rx.try_recv().is_ok() {}
                    self.broadcast_snapshot().await;
                }

                _ = wait_until(engine_deadline) => {
                    self.engine.poll(Instant::now());
                }

                _ = wait_until(reconnect_deadline) => {
                    if self.asr.should_reconnect(Instant::now()) {
                        self.connect_asr().await;
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            self.flush_effects();
        }

        self.shutdown().await;
        Ok(())
    }

    async fn connect_asr(&mut self) {
        if let Err(e) = self.asr.connect(self.asr_tx.clone()).await {
            warn!("Failed to connect to ASR gateway {}: {}", self.asr.url, e);
            self.asr.prepare_reconnect(Instant::now());
        }
    }

    async fn on_asr_event(&mut self, event: AsrEvent) {
        let now = Instant::now();
        match event {
            AsrEvent::Message(AsrMessage::Error {
                error_type,
                message,
            }) => {
                warn!("ASR gateway error ({}): {}", error_type, message);
                self.server
                    .broadcast(&EditorUpdate::Error {
                        message: format!("{}: {}", error_type, message),
                    })
                    .await;
            }
            AsrEvent::Message(message) => self.on_asr_message(message, now),
            AsrEvent::Disconnected => {
                warn!("ASR gateway disconnected");
                self.asr.prepare_reconnect(now);
            }
        }
    }

    /// Apply one gateway message to the engine.
    pub fn on_asr_message(&mut self, message: AsrMessage, now: Instant) {
        if let Some(update) = message.as_update() {
            self.engine.on_asr(&update, now);
            return;
        }

        match message {
            AsrMessage::StateChange { state } => self.apply_recording_state(&state, now),
            AsrMessage::InitialState { state, text } => {
                debug!(
                    "Gateway initial state {} ({} chars buffered)",
                    state,
                    text.chars().count()
                );
                self.apply_recording_state(&state, now);
            }
            AsrMessage::TextUpdate { .. } | AsrMessage::Error { .. } => {}
        }
    }

    fn apply_recording_state(&mut self, state: &str, now: Instant) {
        let Some(target) = recording_state(state) else {
            debug!("Ignoring gateway state {}", state);
            return;
        };

        match (self.engine.recording(), target) {
            (RecordingState::Idle, RecordingState::Recording) => self.engine.start_recording(now),
            (RecordingState::Paused, RecordingState::Recording) => {
                self.engine.resume_recording(now)
            }
            (RecordingState::Recording, RecordingState::Paused) => {
                self.engine.pause_recording(now)
            }
            (RecordingState::Recording | RecordingState::Paused, RecordingState::Idle) => {
                self.engine.stop_recording(now)
            }
            (current, target) => {
                debug!(
                    "No transition from {} to {}",
                    current.as_str(),
                    target.as_str()
                );
            }
        }
    }

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Request { conn_id, request } => {
                self.on_request(&conn_id, request).await;
            }
            ServerEvent::Malformed { conn_id } => {
                self.send_update(
                    &conn_id,
                    &EditorUpdate::Error {
                        message: "unrecognized request".into(),
                    },
                )
                .await;
            }
            ServerEvent::Disconnected { conn_id } => {
                debug!(
                    "{} left, {} editor(s) remain",
                    conn_id,
                    self.server.connection_count()
                );
            }
        }
    }

    async fn on_request(&mut self, conn_id: &str, request: EditorRequest) {
        let now = Instant::now();
        let result = match request {
            EditorRequest::EditBlock { block_id, content } => {
                self.engine.edit_block(&block_id, &content, now)
            }
            EditorRequest::EditText { text } => {
                self.engine.on_user_text(&text, now);
                Ok(())
            }
            EditorRequest::EditSummary { block_id, content } => {
                self.engine.edit_summary(&block_id, &content)
            }
            EditorRequest::Blur => {
                self.engine.on_blur(now);
                Ok(())
            }
            EditorRequest::Save => {
                self.engine.save();
                Ok(())
            }
            EditorRequest::NoteInfo { note_info } => {
                self.engine.set_note_info(note_info);
                Ok(())
            }
            EditorRequest::NewNote => {
                self.engine.new_note(now);
                Ok(())
            }
            EditorRequest::LoadRecord {
                record_id,
                text,
                note_info,
            } => {
                self.engine.load_record(record_id, &text, note_info, now);
                Ok(())
            }
            EditorRequest::Summary { content } => {
                self.engine.insert_summary(&content);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Rejected request from {}: {}", conn_id, e);
            self.send_update(
                conn_id,
                &EditorUpdate::Error {
                    message: e.to_string(),
                },
            )
            .await;
            // The editor's local copy is now stale
            self.send_snapshot(conn_id).await;
        }
    }

    /// Hand queued effects to the delivery task.
    fn flush_effects(&mut self) {
        for mut effect in self.engine.take_effects() {
            if let Effect::Save(payload) = &mut effect {
                if payload.record_id.is_none() {
                    payload.record_id = self.engine.record_id().map(String::from);
                }
            }
            self.delivery.submit(effect);
        }
    }

    /// Remember a record id, unless the note has been replaced since.
    fn on_saved(&mut self, saved: SavedRecord) {
        if saved.session_id != self.engine.session_id() {
            debug!("Record {} belongs to an earlier note", saved.record_id);
            return;
        }
        if self.engine.record_id() != Some(saved.record_id.as_str()) {
            info!("Note saved as record {}", saved.record_id);
            self.engine.set_record_id(saved.record_id);
        }
    }

    async fn send_snapshot(&self, conn_id: &str) {
        self.send_update(conn_id, &EditorUpdate::Snapshot(self.engine.snapshot()))
            .await;
    }

    async fn send_update(&self, conn_id: &str, update: &EditorUpdate) {
        if let Err(e) = self.server.send(conn_id, update).await {
            warn!("Failed to send to {}: {}", conn_id, e);
        }
    }

    async fn broadcast_snapshot(&self) {
        if self.server.connection_count() == 0 {
            return;
        }
        self.server
            .broadcast(&EditorUpdate::Snapshot(self.engine.snapshot()))
            .await;
    }

    async fn shutdown(&mut self) {
        // Stopping flushes a pending autosave
        self.engine.stop_recording(Instant::now());
        self.flush_effects();
        self.delivery.drain(DRAIN_GRACE).await;
        self.asr.close().await;
        self.server.close_all().await;
        info!("Shut down");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
