//! WebSocket server for editor surfaces.
//!
//! Editors connect, receive a snapshot, then send requests. The server only
//! routes frames; all document decisions happen in the reconciler.

use crate::connection::{ConnectionEvent, EditorConnection};
use crate::message::{EditorRequest, EditorUpdate};
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// Event emitted by the server.
#[derive(Debug)]
pub enum ServerEvent {
    Request {
        conn_id: String,
        request: EditorRequest,
    },
    Malformed {
        conn_id: String,
    },
    Disconnected {
        conn_id: String,
    },
}

/// WebSocket server managing editor connections.
pub struct EditorServer {
    connections: HashMap<String, EditorConnection>,
    next_conn_id: u64,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Default for EditorServer {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorServer {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            connections: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Editor server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Upgrade a new TCP connection to WebSocket.
    ///
    /// Returns the connection ID, or `None` if the upgrade failed.
    pub async fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) -> Option<String> {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks connect and close without finishing the upgrade
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before upgrade from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return None;
            }
        };

        let conn_id = format!("editor-{}", self.next_conn_id);
        self.next_conn_id += 1;

        info!("Editor connected from {} (conn_id: {})", addr, conn_id);

        let conn = EditorConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());
        self.connections.insert(conn_id.clone(), conn);
        Some(conn_id)
    }

    /// Wait for the next server event.
    pub async fn recv_event(&mut self) -> Option<ServerEvent> {
        let event = self.event_rx.recv().await?;

        Some(match event {
            ConnectionEvent::Request { conn_id, request } => {
                ServerEvent::Request { conn_id, request }
            }
            ConnectionEvent::Malformed { conn_id } => ServerEvent::Malformed { conn_id },
            ConnectionEvent::Closed { conn_id } => {
                self.connections.remove(&conn_id);
                info!("Editor disconnected: {}", conn_id);
                ServerEvent::Disconnected { conn_id }
            }
        })
    }

    /// Send an update to one editor.
    pub async fn send(&self, conn_id: &str, update: &EditorUpdate) -> Result<()> {
        let conn = self
            .connections
            .get(conn_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown connection: {}", conn_id))?;

        conn.send(update).await
    }

    /// Send an update to every connected editor.
    pub async fn broadcast(&self, update: &EditorUpdate) {
        for (conn_id, conn) in &self.connections {
            if let Err(e) = conn.send(update).await {
                warn!("Failed to broadcast to {}: {}", conn_id, e);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection.
    pub async fn close_all(&mut self) {
        for (_, mut conn) in self.connections.drain() {
            conn.close().await;
        }
    }
}
