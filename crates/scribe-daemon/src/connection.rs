//! One editor surface connected over WebSocket.
//!
//! The stream is split: a spawned task owns the read half and turns frames
//! into [`ConnectionEvent`]s, while the write half stays here behind a lock
//! so the event loop can push updates.

use crate::message::{classify_frame, log_read_error, EditorRequest, EditorUpdate, Frame};
use anyhow::{anyhow, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::debug;

/// Event emitted by a connection's read task.
#[derive(Debug)]
pub enum ConnectionEvent {
    Request {
        conn_id: String,
        request: EditorRequest,
    },
    /// A frame that is not a known request
    Malformed { conn_id: String },
    Closed { conn_id: String },
}

type EditorStream = WebSocketStream<TcpStream>;

pub struct EditorConnection {
    pub conn_id: String,
    sink: Arc<Mutex<SplitSink<EditorStream, Message>>>,
    reader: Option<JoinHandle<()>>,
}

impl EditorConnection {
    /// Take ownership of an upgraded stream and start reading it.
    pub fn new(
        conn_id: String,
        ws_stream: EditorStream,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (sink, stream) = ws_stream.split();

        let reader = tokio::spawn(Self::read_requests(conn_id.clone(), stream, event_tx));

        Self {
            conn_id,
            sink: Arc::new(Mutex::new(sink)),
            reader: Some(reader),
        }
    }

    async fn read_requests(
        conn_id: String,
        mut stream: SplitStream<EditorStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        while let Some(next) = stream.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    log_read_error(&conn_id, &e);
                    break;
                }
            };

            let data = match classify_frame(&conn_id, msg) {
                Frame::Payload(data) => data,
                Frame::Skip => continue,
                Frame::Close => break,
            };

            let event = match EditorRequest::parse(&data) {
                Some(request) => ConnectionEvent::Request {
                    conn_id: conn_id.clone(),
                    request,
                },
                None => {
                    debug!("Unparseable request from {} ({} bytes)", conn_id, data.len());
                    ConnectionEvent::Malformed {
                        conn_id: conn_id.clone(),
                    }
                }
            };
            if event_tx.send(event).is_err() {
                // Server is gone
                return;
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { conn_id });
    }

    /// Send an update as a JSON text frame.
    pub async fn send(&self, update: &EditorUpdate) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(update.to_json().into()))
            .await
            .map_err(|e| anyhow!("Failed to send to {}: {}", self.conn_id, e))
    }

    /// Send a close frame and stop reading.
    pub async fn close(&mut self) {
        if let Ok(mut sink) = self.sink.try_lock() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for EditorConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
