//! scribe-core: live-transcription reconciliation engine.
//!
//! Merges a self-correcting speech-recognition stream with concurrent
//! keyboard edits into one document and one block list:
//! - Operation model and a user-wins transformer for the two writers
//! - Edit session that parks ASR output while the human types
//! - Block segmentation with utterance-boundary repair
//! - Backend trait for sync/save, driven by engine effects

pub mod anchor;
pub mod backend;
pub mod blocks;
pub mod config;
pub mod debounce;
pub mod document;
pub mod engine;
pub mod events;
pub mod operation;
pub mod segment;
pub mod session;
pub mod transform;

pub use anchor::Anchor;
pub use backend::{
    deliver, BackendError, InMemoryBackend, NoteBackend, SaveMetadata, SavePayload, SaveTrigger,
};
pub use blocks::{has_content, to_persisted_text, Block, BlockId, BlockKind, BlockList, NoteInfo};
pub use config::{EngineConfig, OverlapSource, SegmentPolicy};
pub use debounce::Debouncer;
pub use document::Document;
pub use engine::{
    AsrUpdate, Effect, EngineError, Reconciler, RecordingState, Snapshot, TimerKey,
};
pub use events::{EngineEvent, EventBus, Subscription};
pub use operation::{apply_operation, diff_to_operations, Author, OpKind, Operation};
pub use session::{EditSession, PendingAsrQueue, SessionState};
pub use transform::{transform, transform_operations};
