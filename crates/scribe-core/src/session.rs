//! Edit-session state machine and the pending-ASR queue.
//!
//! The session is `Idle` until the human changes the text, then `Editing`
//! until the quiet-period timer (owned by the reconciler) expires. While
//! editing, ASR operations are parked in the queue instead of applied.

use crate::operation::Operation;
use web_time::Instant;

/// Whether the human is actively typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Editing {
        /// First keystroke of this burst
        since: Instant,
    },
}

/// A deferred ASR operation.
#[derive(Debug, Clone)]
pub struct PendingOp {
    /// Already rebased against the first `rebased_through` user operations
    pub op: Operation,
    pub rebased_through: usize,
}

/// ASR operations held back while the human is typing.
#[derive(Debug, Clone, Default)]
pub struct PendingAsrQueue {
    ops: Vec<PendingOp>,
}

impl PendingAsrQueue {
    pub fn push(&mut self, op: Operation, rebased_through: usize) {
        self.ops.push(PendingOp {
            op,
            rebased_through,
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Empty the queue, oldest timestamp first.
    ///
    /// The sort is stable, so operations sharing a timestamp keep queue order.
    pub fn drain_sorted(&mut self) -> Vec<PendingOp> {
        let mut ops = std::mem::take(&mut self.ops);
        ops.sort_by_key(|pending| pending.op.timestamp);
        ops
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

/// Transient per-note editing state.
#[derive(Debug, Clone)]
pub struct EditSession {
    state: SessionState,
    pending: PendingAsrQueue,
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EditSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            pending: PendingAsrQueue::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.state, SessionState::Editing { .. })
    }

    /// Record a keystroke. Returns true on the Idle → Editing transition.
    pub fn begin_edit(&mut self, now: Instant) -> bool {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Editing { since: now };
                true
            }
            SessionState::Editing { .. } => false,
        }
    }

    /// Editing → Idle. Returns the queued ASR operations that must now be
    /// replayed, or `None` if the session was already idle.
    pub fn finish_edit(&mut self) -> Option<Vec<PendingOp>> {
        match self.state {
            SessionState::Idle => None,
            SessionState::Editing { .. } => {
                self.state = SessionState::Idle;
                Some(self.pending.drain_sorted())
            }
        }
    }

    pub fn defer(&mut self, op: Operation, rebased_through: usize) {
        self.pending.push(op, rebased_through);
    }

    pub fn pending(&self) -> &PendingAsrQueue {
        &self.pending
    }

    /// True while ASR output is waiting for the human to stop typing.
    pub fn has_pending_asr(&self) -> bool {
        !self.pending.is_empty()
    }
}
