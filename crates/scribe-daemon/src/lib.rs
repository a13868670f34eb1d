//! scribe-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod asr;
pub mod backend;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod delivery;
pub mod message;
pub mod server;

// Re-export key types for convenience
pub use asr::{AsrClient, AsrEvent, AsrState, ReconnectConfig};
pub use backend::HttpBackend;
pub use config::{ConfigError, DaemonConfig, Overrides};
pub use connection::{ConnectionEvent, EditorConnection};
pub use daemon::Daemon;
pub use delivery::{DeliveryWorker, SavedRecord};
pub use message::{AsrMessage, EditorRequest, EditorUpdate, MAX_MESSAGE_SIZE};
pub use server::{EditorServer, ServerEvent};
