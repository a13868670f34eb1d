//! Connection to the ASR gateway.
//!
//! The daemon is a client of the gateway's WebSocket feed. Handles:
//! - Connection establishment
//! - Automatic reconnection with exponential backoff
//! - State tracking (connecting, connected, reconnecting)

use crate::message::{classify_frame, log_read_error, AsrMessage, Frame};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use web_time::Instant;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Event emitted by the ASR read loop.
#[derive(Debug)]
pub enum AsrEvent {
    Message(AsrMessage),
    Disconnected,
}

/// State of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrState {
    Connecting,
    Connected,
    /// Disconnected, waiting to reconnect
    Reconnecting,
    /// Gave up or shut down
    Closed,
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Reconnection bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    pub attempts: u32,
    /// When to attempt the next reconnection
    pub next_attempt_at: Option<Instant>,
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_reconnect(&mut self, now: Instant, config: &ReconnectConfig) {
        self.attempts += 1;
        self.current_delay = calculate_backoff(self.attempts, config);
        self.next_attempt_at = Some(now + self.current_delay);
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_attempt_at = None;
        self.current_delay = Duration::ZERO;
    }

    pub fn should_reconnect(&self, now: Instant) -> bool {
        self.next_attempt_at.is_some_and(|t| now >= t)
    }

    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }
}

/// Client side of the gateway feed.
pub struct AsrClient {
    /// Gateway WebSocket URL (e.g., "ws://127.0.0.1:8765/ws")
    pub url: String,
    pub state: AsrState,
    pub reconnect: ReconnectState,
    config: ReconnectConfig,
    write: Option<Arc<Mutex<futures::stream::SplitSink<WsStream, Message>>>>,
    read_task: Option<JoinHandle<()>>,
}

impl AsrClient {
    /// Create a client (not yet connected).
    pub fn new(url: impl Into<String>, config: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            state: AsrState::Connecting,
            reconnect: ReconnectState::new(),
            config,
            write: None,
            read_task: None,
        }
    }

    /// Connect to the gateway and start forwarding messages.
    pub async fn connect(&mut self, event_tx: mpsc::UnboundedSender<AsrEvent>) -> Result<()> {
        self.state = AsrState::Connecting;

        let (ws_stream, _) = connect_async(&self.url).await?;
        let (write, read) = ws_stream.split();
        self.write = Some(Arc::new(Mutex::new(write)));

        let url = self.url.clone();
        self.read_task = Some(tokio::spawn(async move {
            Self::read_loop(url, read, event_tx).await;
        }));

        self.state = AsrState::Connected;
        self.reconnect.reset();
        info!("Connected to ASR gateway at {}", self.url);
        Ok(())
    }

    async fn read_loop(
        url: String,
        mut read: futures::stream::SplitStream<WsStream>,
        event_tx: mpsc::UnboundedSender<AsrEvent>,
    ) {
        while let Some(next) = read.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    log_read_error(&url, &e);
                    break;
                }
            };

            let data = match classify_frame(&url, msg) {
                Frame::Payload(data) => data,
                Frame::Skip => continue,
                Frame::Close => break,
            };

            match AsrMessage::parse(&data) {
                Some(message) => {
                    if event_tx.send(AsrEvent::Message(message)).is_err() {
                        return;
                    }
                }
                None => debug!("Ignoring unknown gateway frame ({} bytes)", data.len()),
            }
        }

        let _ = event_tx.send(AsrEvent::Disconnected);
    }

    /// Tear down the current connection and schedule the next attempt.
    ///
    /// Gives up (state `Closed`) once the configured attempt limit is hit.
    pub fn prepare_reconnect(&mut self, now: Instant) {
        self.write = None;
        if let Some(task) = self.read_task.take() {
            task.abort();
        }

        if self.reconnect.exceeded_max_attempts(&self.config) {
            warn!(
                "Giving up on ASR gateway {} after {} attempts",
                self.url, self.reconnect.attempts
            );
            self.state = AsrState::Closed;
            self.reconnect.next_attempt_at = None;
            return;
        }

        self.state = AsrState::Reconnecting;
        self.reconnect.schedule_reconnect(now, &self.config);
        info!(
            "Scheduled reconnect to {} in {:?} (attempt {})",
            self.url, self.reconnect.current_delay, self.reconnect.attempts
        );
    }

    /// When the next reconnect attempt is due, if one is scheduled.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        match self.state {
            AsrState::Reconnecting => self.reconnect.next_attempt_at,
            _ => None,
        }
    }

    pub fn should_reconnect(&self, now: Instant) -> bool {
        self.state == AsrState::Reconnecting && self.reconnect.should_reconnect(now)
    }

    pub async fn close(&mut self) {
        self.state = AsrState::Closed;

        if let Some(write) = self.write.take() {
            if let Ok(mut w) = write.try_lock() {
                let _ = w.send(Message::Close(None)).await;
            }
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for AsrClient {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
