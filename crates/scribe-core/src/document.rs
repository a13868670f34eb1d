//! Document: the reconciled text plus its append-only operation history.
//!
//! Every mutation goes through [`Document::apply`], which applies one
//! operation and records it. Replaying the history from the empty string
//! reproduces the current text; `verify_history` checks exactly that.
//!
//! Content loaded from a saved record is recorded as a single ASR-authored
//! insert. The loaded text is the baseline for both writers, so it must not
//! show up in the user history that ASR operations are rebased against.

use crate::operation::{apply_operation, Author, Operation};
use serde::Serialize;

/// The single mutable text shared by the ASR feed and the human.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Document {
    text: String,
    history: Vec<Operation>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document seeded with existing content.
    pub fn with_text(text: &str, timestamp: u64) -> Self {
        let mut doc = Self::new();
        if !text.is_empty() {
            doc.apply(Operation::insert(0, text, timestamp, Author::Asr));
        }
        doc
    }

    /// Current text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// All applied operations, oldest first
    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    /// Operations written by the human, oldest first
    pub fn user_operations(&self) -> impl Iterator<Item = &Operation> {
        self.history.iter().filter(|op| op.author == Author::User)
    }

    /// Number of user operations recorded so far.
    pub fn user_op_count(&self) -> usize {
        self.user_operations().count()
    }

    /// User operations recorded after the first `skip` of them.
    pub fn user_operations_since(&self, skip: usize) -> impl Iterator<Item = &Operation> {
        self.user_operations().skip(skip)
    }

    /// Apply an operation and append it to the history.
    ///
    /// No-ops are dropped without touching the history. Returns whether the
    /// operation was recorded.
    pub fn apply(&mut self, op: Operation) -> bool {
        if op.is_noop() {
            return false;
        }
        self.text = apply_operation(&self.text, &op);
        self.history.push(op);
        true
    }

    /// Replay the history from scratch and compare with the current text.
    pub fn verify_history(&self) -> bool {
        let replayed = self
            .history
            .iter()
            .fold(String::new(), |text, op| apply_operation(&text, op));
        replayed == self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::diff_to_operations;

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert_eq!(doc.text(), "");
        assert!(doc.history().is_empty());
        assert!(doc.verify_history());
    }

    #[test]
    fn test_seeded_document_is_not_user_history() {
        let doc = Document::with_text("loaded note", 1);
        assert_eq!(doc.text(), "loaded note");
        assert_eq!(doc.history().len(), 1);
        assert_eq!(doc.user_op_count(), 0);
    }

    #[test]
    fn test_apply_records_history_and_replays() {
        let mut doc = Document::with_text("hello", 1);
        for op in diff_to_operations("hello", "hello there", Author::Asr, 2) {
            doc.apply(op);
        }
        for op in diff_to_operations("hello there", "Hello there!", Author::User, 4) {
            doc.apply(op);
        }

        assert_eq!(doc.text(), "Hello there!");
        assert!(doc.user_op_count() >= 1);
        assert!(doc.verify_history());
    }

    #[test]
    fn test_noop_is_not_recorded() {
        let mut doc = Document::with_text("abc", 1);
        assert!(!doc.apply(Operation::noop(1, 2, Author::Asr)));
        assert_eq!(doc.history().len(), 1);
    }

    #[test]
    fn test_user_operations_since() {
        let mut doc = Document::new();
        doc.apply(Operation::insert(0, "a", 1, Author::User));
        doc.apply(Operation::insert(1, "b", 2, Author::Asr));
        doc.apply(Operation::insert(2, "c", 3, Author::User));

        let later: Vec<_> = doc.user_operations_since(1).collect();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].timestamp, 3);
    }
}
