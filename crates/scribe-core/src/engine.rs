//! The reconciler: one note, two writers.
//!
//! `Reconciler` owns the document, the block list, the ASR transcript, the
//! edit session and its timers. Everything is synchronous; the host feeds in
//! ASR updates and user edits, calls [`Reconciler::poll`] when
//! [`Reconciler::next_deadline`] passes, and drains [`Effect`]s for the
//! backend with [`Reconciler::take_effects`].
//!
//! ASR flow per update:
//! 1. the transcript absorbs the update (interim replaces the write-head,
//!    definite finalizes it and repairs the previous utterance)
//! 2. the transcript diff becomes ASR operations
//! 3. those are rebased against the user history
//! 4. idle: applied now; editing: parked until the quiet period ends
//!
//! User edits are diffed against the document and applied immediately.

use crate::backend::{SaveMetadata, SavePayload, SaveTrigger};
use crate::blocks::{has_content, to_persisted_text, Block, BlockId, BlockList, NoteInfo};
use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::document::Document;
use crate::events::{EngineEvent, EventBus};
use crate::operation::{char_len, char_slice, diff_to_operations, Author, Operation};
use crate::segment::{removed_chars, sanitize_utterance, Transcript};
use crate::session::{EditSession, PendingOp};
use crate::transform::{transform, transform_operations_iter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use web_time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Block is receiving live transcription: {0}")]
    BlockLocked(String),

    #[error("Block is not editable as text: {0}")]
    NotEditable(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// One result from the ASR transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrUpdate {
    /// Full current utterance text, not a delta
    pub text: String,
    pub is_definite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
}

impl AsrUpdate {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_definite: false,
            start_time: None,
            end_time: None,
        }
    }

    pub fn definite(text: impl Into<String>) -> Self {
        Self {
            is_definite: true,
            ..Self::interim(text)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
}

impl RecordingState {
    /// ASR owns a write-head while recording or paused.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
        }
    }
}

/// Deadlines owned by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// End of the edit session
    EditQuiet,
    /// Push edited text to the backend
    BackendSync,
    /// Debounced save
    AutoSave,
    /// Save on an interval while recording
    Periodic,
}

/// Work the host must carry out against the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fire-and-forget sync of the reconciled text
    Sync { text: String },
    Save(SavePayload),
}

/// What a rendering surface needs to draw the note.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub blocks: Vec<Block>,
    pub text: String,
    pub pending_asr: bool,
    pub recording: RecordingState,
}

/// Strictly increasing operation timestamps.
///
/// Steps by at least two so a diff's delete/insert pair (`ts`, `ts + 1`)
/// never collides with the next call.
#[derive(Debug, Clone)]
struct OpClock {
    origin: Instant,
    last: u64,
}

impl OpClock {
    fn new(origin: Instant) -> Self {
        Self { origin, last: 0 }
    }

    fn tick(&mut self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_millis() as u64;
        self.last = elapsed.max(self.last + 2);
        self.last
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Live-transcription reconciliation engine for one open note.
#[derive(Debug)]
pub struct Reconciler {
    config: EngineConfig,
    document: Document,
    blocks: BlockList,
    transcript: Transcript,
    session: EditSession,
    timers: Debouncer<TimerKey>,
    recording: RecordingState,
    clock: OpClock,
    effects: Vec<Effect>,
    events: Arc<EventBus>,
    session_id: String,
    record_id: Option<String>,
    /// Block the human is typing in, excluded from saves
    editing_block: Option<BlockId>,
    autosave_trigger: SaveTrigger,
}

impl Reconciler {
    /// Create an engine with an empty note.
    pub fn new(config: EngineConfig, now: Instant) -> Self {
        Self {
            config,
            document: Document::new(),
            blocks: BlockList::new(NoteInfo::started_at(wall_clock_ms())),
            transcript: Transcript::from_text(""),
            session: EditSession::new(),
            timers: Debouncer::new(),
            recording: RecordingState::Idle,
            clock: OpClock::new(now),
            effects: Vec::new(),
            events: Arc::new(EventBus::new()),
            session_id: Uuid::new_v4().to_string(),
            record_id: None,
            editing_block: None,
            autosave_trigger: SaveTrigger::EditComplete,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn text(&self) -> &str {
        self.document.text()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn recording(&self) -> RecordingState {
        self.recording
    }

    /// Text as ASR last saw it, write-head line included.
    pub fn asr_text(&self) -> String {
        self.transcript.text()
    }

    pub fn pending_asr(&self) -> usize {
        self.session.pending().len()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    /// Remember the record created by a save so later saves update it.
    pub fn set_record_id(&mut self, record_id: impl Into<String>) {
        self.record_id = Some(record_id.into());
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            blocks: self.blocks.blocks().to_vec(),
            text: self.document.text().to_string(),
            pending_asr: self.session.has_pending_asr(),
            recording: self.recording,
        }
    }

    /// Earliest armed timer. The host should call [`poll`](Self::poll) then.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn is_timer_armed(&self, key: TimerKey) -> bool {
        self.timers.is_pending(key)
    }

    /// Effects produced since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    // ========================================================================
    // Note lifecycle
    // ========================================================================

    /// Discard the current note and start an empty one.
    pub fn new_note(&mut self, now: Instant) {
        self.reset(String::new(), NoteInfo::started_at(wall_clock_ms()), None, now);
        info!("Started new note (session {})", self.session_id);
    }

    /// Replace the current note with a saved record.
    pub fn load_record(
        &mut self,
        record_id: Option<String>,
        persisted_text: &str,
        note_info: NoteInfo,
        now: Instant,
    ) {
        self.reset(persisted_text.to_string(), note_info, record_id, now);
        info!(
            "Loaded record {:?} ({} blocks)",
            self.record_id,
            self.blocks.len()
        );
    }

    fn reset(&mut self, persisted: String, info: NoteInfo, record_id: Option<String>, now: Instant) {
        self.timers.cancel_all();
        let (blocks, text) = BlockList::from_persisted(&persisted, info);
        let ts = self.clock.tick(now);
        self.document = Document::with_text(&text, ts);
        self.transcript = Transcript::from_text(&text);
        self.blocks = blocks;
        self.session = EditSession::new();
        self.recording = RecordingState::Idle;
        self.session_id = Uuid::new_v4().to_string();
        self.record_id = record_id;
        self.editing_block = None;
        self.events.emit(EngineEvent::BlocksChanged);
    }

    pub fn set_note_info(&mut self, info: NoteInfo) {
        if let Some(current) = self.blocks.note_info_mut() {
            *current = info;
            self.events.emit(EngineEvent::BlocksChanged);
        }
    }

    /// Append a summary block and save right away.
    pub fn insert_summary(&mut self, content: &str) -> BlockId {
        let id = self.blocks.insert_summary(content);
        self.events.emit(EngineEvent::BlocksChanged);
        self.push_save(SaveTrigger::Summary);
        id
    }

    /// Save immediately, replacing any pending autosave.
    pub fn save(&mut self) {
        self.timers.cancel(TimerKey::AutoSave);
        self.push_save(SaveTrigger::Manual);
    }

    // ========================================================================
    // Recording lifecycle
    // ========================================================================

    /// Start a recording session.
    ///
    /// The document history is rebaselined on the current text, so the new
    /// session rebases ASR only against edits made from now on.
    pub fn start_recording(&mut self, now: Instant) {
        if self.recording.is_active() {
            debug!("start_recording ignored while {}", self.recording.as_str());
            return;
        }
        self.flush_edit(now);

        let text = self.document.text().to_string();
        let ts = self.clock.tick(now);
        self.document = Document::with_text(&text, ts);
        self.transcript = Transcript::from_text(&text);

        let before = self.transcript.text();
        self.transcript.begin_session();
        self.set_recording(RecordingState::Recording);
        self.apply_transcript_change(&before, now, None);
        self.arm_periodic(now);
        info!("Recording started");
    }

    pub fn pause_recording(&mut self, now: Instant) {
        if self.recording != RecordingState::Recording {
            return;
        }
        self.flush_edit(now);
        self.timers.cancel(TimerKey::Periodic);
        self.set_recording(RecordingState::Paused);
        info!("Recording paused");
    }

    /// Resume after a pause. The old write-head keeps its text and a new one
    /// is opened below it, unless it is still blank.
    pub fn resume_recording(&mut self, now: Instant) {
        if self.recording != RecordingState::Paused {
            return;
        }
        let before = self.transcript.text();
        self.transcript.open_write_head();
        self.set_recording(RecordingState::Recording);
        self.apply_transcript_change(&before, now, None);
        self.arm_periodic(now);
        info!("Recording resumed");
    }

    /// Stop recording. A pending autosave is flushed before timers are cancelled.
    pub fn stop_recording(&mut self, now: Instant) {
        if !self.recording.is_active() {
            return;
        }
        self.flush_edit(now);

        let pending_save = self.timers.is_pending(TimerKey::AutoSave);
        self.timers.cancel_all();
        self.set_recording(RecordingState::Idle);
        self.blocks.clear_write_head();
        if let Some(info) = self.blocks.note_info_mut() {
            info.end_time = Some(wall_clock_ms());
        }
        self.events.emit(EngineEvent::BlocksChanged);

        if pending_save {
            self.push_save(self.autosave_trigger);
        }
        info!("Recording stopped");
    }

    fn set_recording(&mut self, state: RecordingState) {
        self.recording = state;
        self.events.emit(EngineEvent::RecordingChanged {
            state: state.as_str().to_string(),
        });
    }

    fn arm_periodic(&mut self, now: Instant) {
        if let Some(interval) = self.config.periodic_save() {
            self.timers.schedule_if_idle(TimerKey::Periodic, interval, now);
        }
    }

    // ========================================================================
    // ASR input
    // ========================================================================

    /// Absorb one ASR result.
    pub fn on_asr(&mut self, update: &AsrUpdate, now: Instant) {
        if self.recording != RecordingState::Recording {
            debug!("Ignoring ASR update while {}", self.recording.as_str());
            return;
        }

        let text = sanitize_utterance(&update.text);
        let before = self.transcript.text();

        if update.is_definite {
            let previous = self.transcript.lines().iter().rev().nth(1).cloned();
            let repair = match self.transcript.repairable_span() {
                Some((start, end)) if self.user_touched(start, end) => {
                    debug!("Previous utterance was edited by the user, leaving it intact");
                    false
                }
                _ => true,
            };
            let boundary = self.transcript.finalize(&text, &self.config.segment, repair);
            if let Some(boundary) = boundary.filter(|b| b.truncated) {
                let removed = previous.map(|p| removed_chars(&boundary, &p)).unwrap_or(0);
                debug!(
                    "Repaired cut utterance: dropped {} trailing chars, stripped {} overlapping",
                    removed, boundary.overlap
                );
            }
        } else {
            self.transcript.set_interim(&text);
        }

        self.apply_transcript_change(&before, now, Some(update));

        if update.is_definite {
            self.schedule_autosave(SaveTrigger::DefiniteUtterance, now);
        }
    }

    /// Turn a transcript change into ASR operations and apply or defer them.
    fn apply_transcript_change(&mut self, before: &str, now: Instant, update: Option<&AsrUpdate>) {
        let after = self.transcript.text();
        let ts = self.clock.tick(now);
        let ops = diff_to_operations(before, &after, Author::Asr, ts);
        if ops.is_empty() {
            self.relocate_write_head();
            return;
        }

        let rebased_through = self.document.user_op_count();
        let rebased = transform_operations_iter(&ops, self.document.user_operations());

        if self.session.is_editing() {
            let mut deferred = 0;
            for op in rebased.into_iter().filter(|op| !op.is_noop()) {
                self.session.defer(op, rebased_through);
                deferred += 1;
            }
            if deferred > 0 {
                debug!(
                    "Deferred {} ASR op(s) while editing ({} pending)",
                    deferred,
                    self.pending_asr()
                );
                self.events.emit(EngineEvent::AsrDeferred {
                    pending: self.pending_asr(),
                });
            }
            return;
        }

        let (applied, dropped) = self.apply_asr_ops(rebased);
        if dropped > 0 {
            debug!("Dropped {} ASR op(s) superseded by user edits", dropped);
        }

        let head = self.relocate_write_head();
        if let (Some(update), Some(line)) = (update, head) {
            if update.is_definite {
                if let Some(finalized) = line.checked_sub(1) {
                    self.blocks
                        .set_timing(finalized, update.start_time, update.end_time);
                }
            } else {
                self.blocks.set_timing(line, update.start_time, None);
            }
        }

        if applied > 0 {
            self.events.emit(EngineEvent::ContentChanged {
                author: "asr".into(),
                length: char_len(self.document.text()),
            });
        }
    }

    /// Apply already-rebased ASR operations. Returns (applied, dropped).
    fn apply_asr_ops(&mut self, ops: Vec<Operation>) -> (usize, usize) {
        let mut applied = 0;
        let mut dropped = 0;
        for op in ops {
            if op.is_noop() {
                dropped += 1;
                continue;
            }
            if self.apply_to_document(op) {
                applied += 1;
            }
        }
        (applied, dropped)
    }

    fn apply_to_document(&mut self, op: Operation) -> bool {
        let old_text = self.document.text().to_string();
        let recorded = op.clone();
        if !self.document.apply(op) {
            return false;
        }
        self.blocks
            .apply_operation(&old_text, &recorded, self.document.text());
        true
    }

    /// Whether a user edit of this session landed inside or at the edges of
    /// the transcript span `[start, end]`.
    fn user_touched(&self, start: usize, end: usize) -> bool {
        let mut start = Operation::noop(start, 0, Author::Asr);
        let mut end = Operation::noop(end, 0, Author::Asr);
        for op in self.document.user_operations() {
            if op.position <= end.position && op.end() >= start.position {
                return true;
            }
            start = transform(&start, op);
            end = transform(&end, op);
        }
        false
    }

    /// Point the write-head at the line where the transcript ends, mapped
    /// through every user edit. Returns the write-head line.
    fn relocate_write_head(&mut self) -> Option<usize> {
        if !self.recording.is_active() {
            self.blocks.clear_write_head();
            return None;
        }
        let end = char_len(&self.transcript.text());
        let marker = self
            .document
            .user_operations()
            .fold(Operation::noop(end, 0, Author::Asr), |marker, op| {
                transform(&marker, op)
            });
        let line = char_slice(self.document.text(), 0, marker.position)
            .matches('\n')
            .count();

        let previous = self.blocks.write_head().map(|b| b.id.clone());
        let current = self.blocks.set_write_head_line(line);
        if current.is_none() {
            warn!("No block at write-head line {}", line);
        } else if current != previous {
            self.events.emit(EngineEvent::BlocksChanged);
        }
        current.map(|_| line)
    }

    // ========================================================================
    // User input
    // ========================================================================

    /// Whole-text edit from the surface.
    pub fn on_user_text(&mut self, text: &str, now: Instant) {
        self.apply_user_text(text, now);
    }

    /// Edit one block's content. The write-head and non-text blocks refuse.
    pub fn edit_block(&mut self, id: &str, content: &str, now: Instant) -> Result<()> {
        let block = self
            .blocks
            .get(id)
            .ok_or_else(|| EngineError::UnknownBlock(id.to_string()))?;
        if block.is_asr_writing {
            return Err(EngineError::BlockLocked(id.to_string()));
        }
        if !block.is_content() {
            return Err(EngineError::NotEditable(id.to_string()));
        }
        let text = self
            .blocks
            .text_with_block_content(id, content)
            .ok_or_else(|| EngineError::NotEditable(id.to_string()))?;

        self.editing_block = Some(id.to_string());
        self.apply_user_text(&text, now);
        Ok(())
    }

    /// Edit the text of a summary block.
    pub fn edit_summary(&mut self, id: &str, content: &str) -> Result<()> {
        if self.blocks.set_summary_content(id, content) {
            self.events.emit(EngineEvent::BlocksChanged);
            Ok(())
        } else if self.blocks.get(id).is_some() {
            Err(EngineError::NotEditable(id.to_string()))
        } else {
            Err(EngineError::UnknownBlock(id.to_string()))
        }
    }

    fn apply_user_text(&mut self, text: &str, now: Instant) {
        if text == self.document.text() {
            return;
        }
        let ts = self.clock.tick(now);
        let ops = diff_to_operations(self.document.text(), text, Author::User, ts);
        for op in ops {
            self.apply_to_document(op);
        }

        if self.session.begin_edit(now) {
            debug!("Edit session started");
        }
        self.timers
            .schedule(TimerKey::EditQuiet, self.config.edit_quiet(), now);
        if self.recording.is_active() {
            self.timers
                .schedule(TimerKey::BackendSync, self.config.sync_quiet(), now);
        }

        self.events.emit(EngineEvent::ContentChanged {
            author: "user".into(),
            length: char_len(self.document.text()),
        });
    }

    /// The surface lost focus: end the edit session sooner.
    pub fn on_blur(&mut self, now: Instant) {
        if self.session.is_editing() {
            self.timers
                .schedule(TimerKey::EditQuiet, self.config.blur_quiet(), now);
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Run every timer that is due at `now`.
    pub fn poll(&mut self, now: Instant) {
        for key in self.timers.take_due(now) {
            match key {
                TimerKey::EditQuiet => self.finish_edit(now),
                TimerKey::BackendSync => self.push_sync(),
                TimerKey::AutoSave => self.push_save(self.autosave_trigger),
                TimerKey::Periodic => {
                    if self.recording == RecordingState::Recording {
                        self.push_save(SaveTrigger::Periodic);
                        self.arm_periodic(now);
                    }
                }
            }
        }
    }

    /// End the edit session now instead of waiting for the quiet period.
    fn flush_edit(&mut self, now: Instant) {
        if self.session.is_editing() {
            self.timers.cancel(TimerKey::EditQuiet);
            self.finish_edit(now);
        }
    }

    /// Editing → Idle: replay parked ASR output, then sync and schedule a save.
    fn finish_edit(&mut self, now: Instant) {
        let Some(pending) = self.session.finish_edit() else {
            return;
        };
        debug!("Edit session ended");

        if !pending.is_empty() {
            let (applied, dropped) = self.drain_pending(pending);
            info!(
                "Replayed parked ASR output: {} applied, {} dropped",
                applied, dropped
            );
            self.events
                .emit(EngineEvent::PendingDrained { applied, dropped });
        }
        // The transcript may have moved on even if everything was dropped
        self.relocate_write_head();

        self.editing_block = None;
        if self.recording.is_active() {
            self.timers.cancel(TimerKey::BackendSync);
            self.push_sync();
        }
        self.schedule_autosave(SaveTrigger::EditComplete, now);
    }

    /// Rebase each parked operation against the user edits made after it
    /// was parked, then apply the survivors in timestamp order.
    fn drain_pending(&mut self, pending: Vec<PendingOp>) -> (usize, usize) {
        let mut applied = 0;
        let mut dropped = 0;
        for PendingOp {
            op,
            rebased_through,
        } in pending
        {
            let rebased = self
                .document
                .user_operations_since(rebased_through)
                .fold(op, |op, user| transform(&op, user));
            if rebased.is_noop() {
                dropped += 1;
            } else if self.apply_to_document(rebased) {
                applied += 1;
            }
        }
        (applied, dropped)
    }

    // ========================================================================
    // Effects
    // ========================================================================

    fn push_sync(&mut self) {
        if !self.recording.is_active() {
            return;
        }
        self.effects.push(Effect::Sync {
            text: self.document.text().to_string(),
        });
    }

    fn schedule_autosave(&mut self, trigger: SaveTrigger, now: Instant) {
        self.autosave_trigger = trigger;
        self.timers
            .schedule(TimerKey::AutoSave, self.config.autosave_debounce(), now);
    }

    /// Build the save payload from stable blocks. Skipped without content.
    pub fn save_payload(&self, trigger: SaveTrigger) -> Option<SavePayload> {
        let blocks = self.blocks.stable_blocks(self.editing_block.as_deref());
        if !has_content(&blocks) {
            return None;
        }
        Some(SavePayload {
            text: to_persisted_text(&blocks),
            app_type: "voice-note".into(),
            metadata: SaveMetadata {
                block_count: blocks.len(),
                note_info: self.blocks.note_info().cloned(),
                blocks,
                trigger,
                timestamp: wall_clock_ms(),
                session_id: self.session_id.clone(),
            },
            record_id: self.record_id.clone(),
        })
    }

    fn push_save(&mut self, trigger: SaveTrigger) {
        match self.save_payload(trigger) {
            Some(payload) => self.effects.push(Effect::Save(payload)),
            None => debug!("Skipping {:?} save: nothing to persist", trigger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn recording(now: Instant) -> Reconciler {
        let mut engine = Reconciler::new(EngineConfig::default(), now);
        engine.start_recording(now);
        engine
    }

    #[test]
    fn test_start_opens_write_head_on_empty_note() {
        let now = Instant::now();
        let engine = recording(now);
        let head = engine.blocks().write_head().unwrap();
        assert_eq!(head.content, "");
        assert_eq!(engine.blocks().len(), 3);
    }

    #[test]
    fn test_interim_updates_write_head_in_place() {
        let now = Instant::now();
        let mut engine = recording(now);

        engine.on_asr(&AsrUpdate::interim("foo"), now);
        let head = engine.blocks().write_head().unwrap().id.clone();
        engine.on_asr(&AsrUpdate::interim("foo bar"), now + ms(10));

        assert_eq!(engine.text(), "foo bar");
        let block = engine.blocks().get(&head).unwrap();
        assert_eq!(block.content, "foo bar");
        assert!(block.is_asr_writing);
    }

    #[test]
    fn test_definite_opens_new_write_head() {
        let now = Instant::now();
        let mut engine = recording(now);

        engine.on_asr(&AsrUpdate::interim("hello"), now);
        engine.on_asr(&AsrUpdate::definite("hello."), now + ms(5));

        assert_eq!(engine.text(), "hello.\n");
        let finalized = engine.blocks().block_at_line(0).unwrap();
        assert!(!finalized.is_asr_writing);
        assert_eq!(finalized.content, "hello.");
        assert_eq!(engine.blocks().write_head().unwrap().content, "");
        assert!(engine.is_timer_armed(TimerKey::AutoSave));
    }

    #[test]
    fn test_asr_ignored_when_not_recording() {
        let now = Instant::now();
        let mut engine = Reconciler::new(EngineConfig::default(), now);
        engine.on_asr(&AsrUpdate::interim("lost"), now);
        assert_eq!(engine.text(), "");
        assert!(engine.blocks().write_head().is_none());
    }

    #[test]
    fn test_edit_block_rejects_write_head_and_unknown() {
        let now = Instant::now();
        let mut engine = recording(now);
        let head = engine.blocks().write_head().unwrap().id.clone();

        assert_eq!(
            engine.edit_block(&head, "x", now),
            Err(EngineError::BlockLocked(head.clone()))
        );
        assert_eq!(
            engine.edit_block("nope", "x", now),
            Err(EngineError::UnknownBlock("nope".into()))
        );

        let header = engine.blocks().blocks()[0].id.clone();
        assert_eq!(
            engine.edit_block(&header, "x", now),
            Err(EngineError::NotEditable(header.clone()))
        );
    }

    #[test]
    fn test_user_edit_starts_session_and_timers() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::definite("one."), now);
        let first = engine.blocks().block_at_line(0).unwrap().id.clone();

        engine.edit_block(&first, "One.", now + ms(10)).unwrap();
        assert!(engine.session().is_editing());
        assert_eq!(engine.text(), "One.\n");
        assert!(engine.is_timer_armed(TimerKey::EditQuiet));
        assert!(engine.is_timer_armed(TimerKey::BackendSync));

        // Sync fires before the session ends
        engine.poll(now + ms(1010));
        let effects = engine.take_effects();
        assert_eq!(
            effects,
            vec![Effect::Sync {
                text: "One.\n".into()
            }]
        );
        assert!(engine.session().is_editing());

        engine.poll(now + ms(1510));
        assert!(!engine.session().is_editing());
    }

    #[test]
    fn test_blur_shortens_quiet_period() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::definite("one."), now);
        let first = engine.blocks().block_at_line(0).unwrap().id.clone();

        engine.edit_block(&first, "One.", now).unwrap();
        engine.on_blur(now + ms(100));
        engine.poll(now + ms(600));
        assert!(!engine.session().is_editing());
    }

    #[test]
    fn test_pause_flushes_edit_and_syncs() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::definite("one."), now);
        let first = engine.blocks().block_at_line(0).unwrap().id.clone();
        engine.edit_block(&first, "One.", now).unwrap();
        engine.on_asr(&AsrUpdate::interim("two"), now + ms(20));
        assert_eq!(engine.pending_asr(), 1);

        engine.pause_recording(now + ms(30));
        assert!(!engine.session().is_editing());
        assert_eq!(engine.text(), "One.\ntwo");
        assert!(engine
            .take_effects()
            .iter()
            .any(|e| matches!(e, Effect::Sync { text } if text == "One.\ntwo")));
        assert_eq!(engine.recording(), RecordingState::Paused);
        assert!(engine.blocks().write_head().is_some());
    }

    #[test]
    fn test_resume_opens_new_write_head() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::interim("half said"), now);
        engine.pause_recording(now + ms(10));
        engine.resume_recording(now + ms(20));

        assert_eq!(engine.text(), "half said\n");
        assert_eq!(engine.blocks().write_head().unwrap().content, "");
    }

    #[test]
    fn test_stop_clears_write_head_and_timers() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::definite("done."), now);
        engine.stop_recording(now + ms(10));

        assert!(engine.blocks().write_head().is_none());
        assert!(engine.next_deadline().is_none());
        assert!(engine.blocks().note_info().unwrap().end_time.is_some());

        // Pending autosave was flushed on the way out
        let effects = engine.take_effects();
        match effects.as_slice() {
            [Effect::Save(payload)] => {
                assert_eq!(payload.text, "done.");
                assert_eq!(payload.metadata.trigger, SaveTrigger::DefiniteUtterance);
            }
            other => panic!("unexpected effects: {:?}", other),
        }
    }

    #[test]
    fn test_save_excludes_write_head_and_skips_empty() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.save();
        assert!(engine.take_effects().is_empty());

        engine.on_asr(&AsrUpdate::definite("kept."), now);
        engine.on_asr(&AsrUpdate::interim("in flight"), now + ms(5));
        engine.save();

        let effects = engine.take_effects();
        let Some(Effect::Save(payload)) = effects.first() else {
            panic!("expected a save");
        };
        assert_eq!(payload.text, "kept.");
        assert!(payload.metadata.blocks.iter().all(|b| !b.is_asr_writing));
        assert_eq!(payload.app_type, "voice-note");
        assert_eq!(payload.metadata.session_id, engine.session_id());
    }

    #[test]
    fn test_periodic_save_while_recording() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::definite("tick."), now);
        engine.take_effects();

        engine.poll(now + ms(60_000));
        let effects = engine.take_effects();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Save(p) if p.metadata.trigger == SaveTrigger::Periodic
        )));
        assert!(engine.is_timer_armed(TimerKey::Periodic));
    }

    #[test]
    fn test_summary_saved_immediately() {
        let now = Instant::now();
        let mut engine = Reconciler::new(EngineConfig::default(), now);
        engine.insert_summary("key points");

        let effects = engine.take_effects();
        let [Effect::Save(payload)] = effects.as_slice() else {
            panic!("expected one save");
        };
        assert_eq!(payload.metadata.trigger, SaveTrigger::Summary);
        assert_eq!(payload.text, "[SUMMARY_BLOCK_START]key points[SUMMARY_BLOCK_END]");
    }

    #[test]
    fn test_new_note_resets_everything() {
        let now = Instant::now();
        let mut engine = recording(now);
        let old_session = engine.session_id().to_string();
        engine.on_asr(&AsrUpdate::definite("gone."), now);
        engine.set_record_id("r-1");

        engine.new_note(now + ms(10));
        assert_eq!(engine.text(), "");
        assert_eq!(engine.recording(), RecordingState::Idle);
        assert!(engine.next_deadline().is_none());
        assert!(engine.record_id().is_none());
        assert_ne!(engine.session_id(), old_session);
        assert!(engine.document().history().is_empty());
    }

    #[test]
    fn test_load_record_restores_blocks() {
        let now = Instant::now();
        let mut engine = Reconciler::new(EngineConfig::default(), now);
        engine.load_record(
            Some("r-7".into()),
            "first\n[SUMMARY_BLOCK_START]sum[SUMMARY_BLOCK_END]\nsecond",
            NoteInfo::default(),
            now,
        );

        assert_eq!(engine.text(), "first\nsecond");
        assert_eq!(engine.record_id(), Some("r-7"));
        assert_eq!(engine.document().user_op_count(), 0);
        assert!(engine.blocks().blocks().iter().any(|b| b.is_summary()));
    }

    #[test]
    fn test_history_replays_to_text() {
        let now = Instant::now();
        let mut engine = recording(now);
        engine.on_asr(&AsrUpdate::interim("a b"), now);
        engine.on_asr(&AsrUpdate::definite("a b c."), now + ms(1));
        let first = engine.blocks().block_at_line(0).unwrap().id.clone();
        engine.edit_block(&first, "A b c.", now + ms(2)).unwrap();
        engine.on_asr(&AsrUpdate::interim("next"), now + ms(3));
        engine.poll(now + ms(5000));

        assert_eq!(engine.text(), "A b c.\nnext");
        assert!(engine.document().verify_history());
        assert_eq!(engine.blocks().content_text(), engine.text());
    }

    #[test]
    fn test_op_clock_is_strictly_increasing() {
        let origin = Instant::now();
        let mut clock = OpClock::new(origin);
        let a = clock.tick(origin);
        let b = clock.tick(origin);
        let c = clock.tick(origin + ms(100));
        assert!(b >= a + 2);
        assert_eq!(c, 100);
    }
}
