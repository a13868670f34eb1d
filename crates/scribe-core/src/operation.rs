//! Operation model: the atomic edit unit and the pure functions over it.
//!
//! All positions and lengths are counted in Unicode scalar values (`char`s),
//! never bytes, so a transcript full of CJK text shifts the same way ASCII does.
//!
//! - `apply_operation` turns `(text, op)` into a new text without side effects
//! - `diff_to_operations` computes a prefix/suffix diff between two texts

use serde::{Deserialize, Serialize};

/// Who produced an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    /// Speech recognition feed
    Asr,
    /// The human at the keyboard
    User,
}

/// What an operation does to the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OpKind {
    Insert {
        text: String,
    },
    Delete {
        length: usize,
    },
    Replace {
        text: String,
        /// Expected content of the replaced span; its length bounds the span.
        #[serde(rename = "oldText")]
        old_text: String,
    },
}

/// A single edit, valid only against the text it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub kind: OpKind,
    pub position: usize,
    pub timestamp: u64,
    pub author: Author,
}

impl Operation {
    pub fn insert(position: usize, text: impl Into<String>, timestamp: u64, author: Author) -> Self {
        Self {
            kind: OpKind::Insert { text: text.into() },
            position,
            timestamp,
            author,
        }
    }

    pub fn delete(position: usize, length: usize, timestamp: u64, author: Author) -> Self {
        Self {
            kind: OpKind::Delete { length },
            position,
            timestamp,
            author,
        }
    }

    pub fn replace(
        position: usize,
        old_text: impl Into<String>,
        text: impl Into<String>,
        timestamp: u64,
        author: Author,
    ) -> Self {
        Self {
            kind: OpKind::Replace {
                text: text.into(),
                old_text: old_text.into(),
            },
            position,
            timestamp,
            author,
        }
    }

    /// Canonical no-op: an empty insert. Applying it never changes a text.
    pub fn noop(position: usize, timestamp: u64, author: Author) -> Self {
        Self::insert(position, String::new(), timestamp, author)
    }

    /// True for an empty insert or a zero-length delete.
    pub fn is_noop(&self) -> bool {
        match &self.kind {
            OpKind::Insert { text } => text.is_empty(),
            OpKind::Delete { length } => *length == 0,
            OpKind::Replace { text, old_text } => text.is_empty() && old_text.is_empty(),
        }
    }

    /// Number of characters of the base text the operation covers.
    ///
    /// An insert covers nothing (it sits between two characters); deletes
    /// and replaces cover the span they remove.
    pub fn extent(&self) -> usize {
        match &self.kind {
            OpKind::Insert { .. } => 0,
            OpKind::Delete { length } => *length,
            OpKind::Replace { old_text, .. } => char_len(old_text),
        }
    }

    /// End of the affected range in the base text (`position + extent`).
    pub fn end(&self) -> usize {
        self.position + self.extent()
    }

    /// Net change in text length once this operation is applied.
    pub fn delta(&self) -> isize {
        match &self.kind {
            OpKind::Insert { text } => char_len(text) as isize,
            OpKind::Delete { length } => -(*length as isize),
            OpKind::Replace { text, old_text } => {
                char_len(text) as isize - char_len(old_text) as isize
            }
        }
    }

    /// Copy of this operation moved by `delta` characters, floored at zero.
    pub fn shifted(&self, delta: isize) -> Self {
        Self {
            position: self.position.saturating_add_signed(delta),
            ..self.clone()
        }
    }

    /// Copy of this operation moved to an absolute position.
    pub fn moved_to(&self, position: usize) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }
}

/// Length of `s` in characters.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte index of the `char_idx`-th character, clamped to `s.len()`.
pub fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(byte, _)| byte)
        .unwrap_or(s.len())
}

/// Slice of `s` between two character offsets (both clamped).
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let start_byte = byte_offset(s, start);
    let end_byte = byte_offset(s, end.max(start));
    &s[start_byte..end_byte]
}

/// Apply `op` to `document`, returning the new text.
///
/// Out-of-range positions and lengths are clamped to the document bounds.
/// No-op operations return the document unchanged.
pub fn apply_operation(document: &str, op: &Operation) -> String {
    if op.is_noop() {
        return document.to_string();
    }

    let doc_len = char_len(document);
    let pos = op.position.min(doc_len);

    let (removed, inserted) = match &op.kind {
        OpKind::Insert { text } => (0, text.as_str()),
        OpKind::Delete { length } => ((*length).min(doc_len - pos), ""),
        OpKind::Replace { text, old_text } => {
            (char_len(old_text).min(doc_len - pos), text.as_str())
        }
    };

    if removed == 0 && inserted.is_empty() {
        return document.to_string();
    }

    let start = byte_offset(document, pos);
    let end = byte_offset(document, pos + removed);

    let mut out = String::with_capacity(document.len() + inserted.len());
    out.push_str(&document[..start]);
    out.push_str(inserted);
    out.push_str(&document[end..]);
    out
}

/// Apply a batch of operations in order.
pub fn apply_all<'a>(document: &str, ops: impl IntoIterator<Item = &'a Operation>) -> String {
    ops.into_iter()
        .fold(document.to_string(), |text, op| apply_operation(&text, op))
}

/// Compute the operations that turn `old_text` into `new_text`.
///
/// This is a two-pointer scan from both ends, not an LCS diff: a single
/// contiguous changed span is located, which mis-locates non-contiguous
/// edits but is always correct when the result is applied in order.
///
/// The delete/insert pair emitted for a middle change carries consecutive
/// timestamps (`timestamp`, `timestamp + 1`) to fix their order.
pub fn diff_to_operations(
    old_text: &str,
    new_text: &str,
    author: Author,
    timestamp: u64,
) -> Vec<Operation> {
    if old_text == new_text {
        return Vec::new();
    }

    let old: Vec<char> = old_text.chars().collect();
    let new: Vec<char> = new_text.chars().collect();

    // Pure append
    if new.starts_with(&old) {
        let appended: String = new[old.len()..].iter().collect();
        return vec![Operation::insert(old.len(), appended, timestamp, author)];
    }

    // Pure truncation
    if old.starts_with(&new) {
        return vec![Operation::delete(
            new.len(),
            old.len() - new.len(),
            timestamp,
            author,
        )];
    }

    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }

    // Exclusive ends of the differing middles
    let mut old_end = old.len();
    let mut new_end = new.len();
    while old_end > prefix && new_end > prefix && old[old_end - 1] == new[new_end - 1] {
        old_end -= 1;
        new_end -= 1;
    }

    if prefix == 0 && old_end == old.len() && new_end == new.len() {
        return vec![Operation::replace(0, old_text, new_text, timestamp, author)];
    }

    let mut ops = Vec::with_capacity(2);
    if old_end > prefix {
        ops.push(Operation::delete(prefix, old_end - prefix, timestamp, author));
    }
    if new_end > prefix {
        let inserted: String = new[prefix..new_end].iter().collect();
        ops.push(Operation::insert(prefix, inserted, timestamp + 1, author));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(a: &str, b: &str) -> String {
        let ops = diff_to_operations(a, b, Author::User, 10);
        apply_all(a, &ops)
    }

    #[test]
    fn test_diff_append_is_single_insert() {
        let ops = diff_to_operations("foo", "foo bar", Author::Asr, 1);
        assert_eq!(ops, vec![Operation::insert(3, " bar", 1, Author::Asr)]);
    }

    #[test]
    fn test_diff_truncation_is_single_delete() {
        let ops = diff_to_operations("hello world", "hello", Author::Asr, 1);
        assert_eq!(ops, vec![Operation::delete(5, 6, 1, Author::Asr)]);
    }

    #[test]
    fn test_diff_disjoint_is_replace() {
        let ops = diff_to_operations("abc", "xyz", Author::User, 1);
        assert_eq!(ops, vec![Operation::replace(0, "abc", "xyz", 1, Author::User)]);
    }

    #[test]
    fn test_diff_middle_change_orders_delete_before_insert() {
        let ops = diff_to_operations("the cat sat", "the dog sat", Author::User, 7);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], Operation::delete(4, 3, 7, Author::User));
        assert_eq!(ops[1], Operation::insert(4, "dog", 8, Author::User));
    }

    #[test]
    fn test_diff_identical_texts_is_empty() {
        assert!(diff_to_operations("same", "same", Author::User, 1).is_empty());
    }

    #[test]
    fn test_diff_roundtrip_cases() {
        let cases = [
            ("", ""),
            ("", "abc"),
            ("abc", ""),
            ("abc", "abXc"),
            ("aaaa", "aa"),
            ("abab", "ab"),
            ("今天天气很好", "今天天气不好"),
            ("first\nsecond", "first\nthird\nsecond"),
            ("xyz", "abc"),
            ("a", "ba"),
        ];
        for (a, b) in cases {
            assert_eq!(roundtrip(a, b), b, "diff({:?}, {:?})", a, b);
        }
    }

    #[test]
    fn test_apply_clamps_out_of_range() {
        let op = Operation::insert(100, "!", 1, Author::User);
        assert_eq!(apply_operation("hi", &op), "hi!");

        let op = Operation::delete(1, 50, 1, Author::User);
        assert_eq!(apply_operation("hello", &op), "h");

        let op = Operation::delete(9, 3, 1, Author::User);
        assert_eq!(apply_operation("hello", &op), "hello");
    }

    #[test]
    fn test_noops_never_change_document() {
        let doc = "unchanged";
        assert_eq!(apply_operation(doc, &Operation::noop(3, 1, Author::Asr)), doc);
        assert_eq!(apply_operation(doc, &Operation::delete(3, 0, 1, Author::Asr)), doc);
    }

    #[test]
    fn test_apply_uses_char_offsets() {
        let op = Operation::insert(2, "很", 1, Author::Asr);
        assert_eq!(apply_operation("天气好", &op), "天气很好");

        let op = Operation::replace(0, "天气", "今天", 1, Author::Asr);
        assert_eq!(apply_operation("天气好", &op), "今天好");
    }

    #[test]
    fn test_delta_and_extent() {
        let replace = Operation::replace(0, "hello", "hello world", 1, Author::User);
        assert_eq!(replace.extent(), 5);
        assert_eq!(replace.delta(), 6);

        let insert = Operation::insert(4, "abc", 1, Author::Asr);
        assert_eq!(insert.end(), 4);
        assert_eq!(insert.delta(), 3);

        let delete = Operation::delete(3, 2, 1, Author::Asr);
        assert_eq!(delete.end(), 5);
        assert_eq!(delete.delta(), -2);
    }

    #[test]
    fn test_operation_serialization_shape() {
        let op = Operation::replace(2, "ab", "cd", 5, Author::Asr);
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"replace\""));
        assert!(json.contains("\"oldText\":\"ab\""));
        assert!(json.contains("\"author\":\"asr\""));

        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
