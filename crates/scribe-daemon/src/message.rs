//! Wire messages.
//!
//! Everything is JSON in WebSocket text frames. Inbound frames that fail to
//! parse are logged and skipped by the connection read loops.

use scribe_core::{AsrUpdate, NoteInfo, RecordingState, Snapshot};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, warn};

/// Maximum frame size (8MB); long notes fit comfortably.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// What a read loop does with one incoming frame.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Payload(Vec<u8>),
    Skip,
    Close,
}

/// Sort a frame from `source` into payload, control or close.
pub fn classify_frame(source: &str, msg: Message) -> Frame {
    let data = match msg {
        Message::Text(text) => text.into_bytes(),
        Message::Binary(data) => data.to_vec(),
        Message::Close(_) => {
            debug!("Received close frame from {}", source);
            return Frame::Close;
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Frame::Skip,
    };

    if data.len() > MAX_MESSAGE_SIZE {
        warn!(
            "Message from {} exceeds max size ({} > {}), dropping",
            source,
            data.len(),
            MAX_MESSAGE_SIZE
        );
        return Frame::Skip;
    }
    Frame::Payload(data)
}

/// Log why a read loop ended.
pub fn log_read_error(source: &str, e: &WsError) {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => debug!("Connection {} closed", source),
        _ => error!("WebSocket error on {}: {}", source, e),
    }
}

/// Message pushed by the ASR gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AsrMessage {
    TextUpdate {
        text: String,
        #[serde(default, rename = "isDefinite")]
        is_definite: bool,
        #[serde(default, rename = "startTime", skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(default, rename = "endTime", skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
    },
    StateChange {
        state: String,
    },
    /// Sent once on connect
    InitialState {
        state: String,
        #[serde(default)]
        text: String,
    },
    Error {
        #[serde(default)]
        error_type: String,
        message: String,
    },
}

impl AsrMessage {
    pub fn parse(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }

    /// The update carried by a `text_update`.
    pub fn as_update(&self) -> Option<AsrUpdate> {
        match self {
            Self::TextUpdate {
                text,
                is_definite,
                start_time,
                end_time,
            } => Some(AsrUpdate {
                text: text.clone(),
                is_definite: *is_definite,
                start_time: *start_time,
                end_time: *end_time,
            }),
            _ => None,
        }
    }
}

/// Map a gateway state string onto the recording lifecycle.
///
/// Transitional states ("processing" while the gateway flushes audio) map to
/// `None` and are ignored.
pub fn recording_state(state: &str) -> Option<RecordingState> {
    match state {
        "recording" => Some(RecordingState::Recording),
        "paused" => Some(RecordingState::Paused),
        "idle" => Some(RecordingState::Idle),
        _ => None,
    }
}

/// Request from an editor surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorRequest {
    EditBlock {
        #[serde(rename = "blockId")]
        block_id: String,
        content: String,
    },
    EditText {
        text: String,
    },
    EditSummary {
        #[serde(rename = "blockId")]
        block_id: String,
        content: String,
    },
    Blur,
    Save,
    NoteInfo {
        #[serde(rename = "noteInfo")]
        note_info: NoteInfo,
    },
    NewNote,
    LoadRecord {
        #[serde(default, rename = "recordId")]
        record_id: Option<String>,
        text: String,
        #[serde(default, rename = "noteInfo")]
        note_info: NoteInfo,
    },
    Summary {
        content: String,
    },
}

impl EditorRequest {
    pub fn parse(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// Message sent to editor surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorUpdate {
    Snapshot(Snapshot),
    Error { message: String },
}

impl EditorUpdate {
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
