//! Block segmenter: the ASR transcript and utterance-boundary heuristics.
//!
//! ASR engines regularly cut an utterance mid-sentence and then restate the
//! cut fragment at the start of the next definite result. When the previous
//! block does not end on punctuation it is truncated back to its last
//! punctuation mark, and a restated prefix of the new text is stripped.
//! A missed match leaves a duplicated phrase, never lost text.

use crate::config::{OverlapSource, SegmentPolicy};
use crate::operation::char_len;

/// Outcome of joining a definite utterance onto the previous block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// New content for the previous block
    pub previous: String,
    /// Text to finalize as the new block
    pub text: String,
    /// Whether the previous block was cut back
    pub truncated: bool,
    /// Number of leading characters removed from the new text
    pub overlap: usize,
}

/// True if the last `policy.tail_check_chars` characters contain punctuation.
pub fn ends_on_boundary(text: &str, policy: &SegmentPolicy) -> bool {
    let trimmed = text.trim_end();
    trimmed
        .chars()
        .rev()
        .take(policy.tail_check_chars)
        .any(|c| policy.is_punctuation(c))
}

/// Character index of the last punctuation mark in `text`.
pub fn last_punctuation(text: &str, policy: &SegmentPolicy) -> Option<usize> {
    text.chars()
        .enumerate()
        .filter(|(_, c)| policy.is_punctuation(*c))
        .map(|(i, _)| i)
        .last()
}

/// Split `text` after its last punctuation mark into (retained, discarded).
/// Without any punctuation the whole text is discarded.
pub fn split_at_last_punctuation<'a>(text: &'a str, policy: &SegmentPolicy) -> (&'a str, &'a str) {
    match text.char_indices().filter(|(_, c)| policy.is_punctuation(*c)).last() {
        Some((byte, c)) => text.split_at(byte + c.len_utf8()),
        None => ("", text),
    }
}

/// Length of the longest suffix of `reference` (between `overlap_min` and
/// `overlap_max` characters) that `text` starts with.
pub fn find_overlap(reference: &str, text: &str, policy: &SegmentPolicy) -> usize {
    let ref_chars: Vec<char> = reference.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();
    let window = policy.overlap_max.min(ref_chars.len());

    if window < policy.overlap_min {
        return 0;
    }

    (policy.overlap_min..=window)
        .rev()
        .find(|&len| text_chars.starts_with(&ref_chars[ref_chars.len() - len..]))
        .unwrap_or(0)
}

/// Decide how a definite utterance joins the previous finalized block.
pub fn join_utterance(previous: &str, text: &str, policy: &SegmentPolicy) -> Boundary {
    let prev = previous.trim();

    if prev.is_empty() || ends_on_boundary(prev, policy) {
        return Boundary {
            previous: previous.to_string(),
            text: text.to_string(),
            truncated: false,
            overlap: 0,
        };
    }

    let (retained, discarded) = split_at_last_punctuation(prev, policy);
    let reference = match policy.overlap_source {
        OverlapSource::DiscardedTail => discarded,
        OverlapSource::RetainedTail => retained,
    };

    let overlap = find_overlap(reference, text, policy);
    let stripped: String = text.chars().skip(overlap).collect();

    Boundary {
        previous: retained.to_string(),
        text: stripped,
        truncated: true,
        overlap,
    }
}

/// Convenience for logging: how many characters a truncation removed.
pub fn removed_chars(boundary: &Boundary, previous: &str) -> usize {
    char_len(previous.trim()).saturating_sub(char_len(&boundary.previous))
}

/// ASR's own view of the note, one entry per line.
///
/// The last line is the write-head: interim results replace it, a definite
/// result finalizes it and opens a fresh one. The reconciler diffs this text
/// before and after each event to get the ASR operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
    /// First line written by ASR in the current recording session
    finalized_from: usize,
}

impl Transcript {
    pub fn from_text(text: &str) -> Self {
        let lines: Vec<String> = text.split('\n').map(String::from).collect();
        let finalized_from = lines.len();
        Self {
            lines,
            finalized_from,
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Current write-head content.
    pub fn interim(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    /// Open a write-head line at the end, reusing a trailing blank line.
    /// Returns whether a line was added.
    pub fn open_write_head(&mut self) -> bool {
        if self.lines.last().is_some_and(|line| line.trim().is_empty()) {
            return false;
        }
        self.lines.push(String::new());
        true
    }

    /// Start a recording session: lines before the write-head are off limits
    /// to boundary repair.
    pub fn begin_session(&mut self) {
        self.open_write_head();
        self.finalized_from = self.lines.len() - 1;
    }

    pub fn set_interim(&mut self, text: &str) {
        match self.lines.last_mut() {
            Some(line) => *line = text.to_string(),
            None => self.lines.push(text.to_string()),
        }
    }

    /// Char span `[start, end]` of the line before the write-head, when that
    /// line was written by ASR in this session and is open to repair.
    pub fn repairable_span(&self) -> Option<(usize, usize)> {
        let head = self.lines.len().checked_sub(1)?;
        if head <= self.finalized_from {
            return None;
        }
        let start: usize = self.lines[..head - 1]
            .iter()
            .map(|line| char_len(line) + 1)
            .sum();
        Some((start, start + char_len(&self.lines[head - 1])))
    }

    /// Finalize the write-head with a definite utterance and open a new one.
    ///
    /// With `repair` set and a previous line written by ASR in this session,
    /// that line is joined with [`join_utterance`] first. The caller clears
    /// `repair` once the human has touched the previous line.
    pub fn finalize(&mut self, text: &str, policy: &SegmentPolicy, repair: bool) -> Option<Boundary> {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
        let head = self.lines.len() - 1;

        let mut boundary = None;
        let finalized = if repair && head > self.finalized_from {
            let joined = join_utterance(&self.lines[head - 1], text, policy);
            self.lines[head - 1] = joined.previous.clone();
            let stripped = joined.text.clone();
            boundary = Some(joined);
            stripped
        } else {
            text.to_string()
        };

        self.lines[head] = finalized;
        self.lines.push(String::new());
        boundary
    }
}

/// ASR text is single-line; stray line breaks would split blocks.
pub fn sanitize_utterance(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SegmentPolicy {
        SegmentPolicy::default()
    }

    #[test]
    fn test_boundary_detection_checks_last_two_chars() {
        assert!(ends_on_boundary("好的。", &policy()));
        assert!(ends_on_boundary("ok.\"", &SegmentPolicy {
            punctuation: ".\"".into(),
            ..policy()
        }));
        assert!(ends_on_boundary("好。了", &policy()));
        assert!(!ends_on_boundary("好。很好", &policy()));
        assert!(!ends_on_boundary("我们去", &policy()));
    }

    #[test]
    fn test_truncated_utterance_without_punctuation() {
        let boundary = join_utterance("今天天气很好我们去", "我们去爬山了。", &policy());
        assert_eq!(boundary.previous, "");
        assert_eq!(boundary.text, "爬山了。");
        assert!(boundary.truncated);
        assert_eq!(boundary.overlap, 3);
    }

    #[test]
    fn test_truncated_back_to_last_punctuation() {
        let boundary = join_utterance("今天天气很好，我们去", "我们去爬山了。", &policy());
        assert_eq!(boundary.previous, "今天天气很好，");
        assert_eq!(boundary.text, "爬山了。");
    }

    #[test]
    fn test_punctuated_previous_is_left_intact() {
        let boundary = join_utterance("今天天气很好。", "我们去爬山了。", &policy());
        assert_eq!(boundary.previous, "今天天气很好。");
        assert_eq!(boundary.text, "我们去爬山了。");
        assert!(!boundary.truncated);
    }

    #[test]
    fn test_short_overlap_is_ignored() {
        let boundary = join_utterance("hello, we go", "go home.", &policy());
        assert_eq!(boundary.previous, "hello,");
        assert_eq!(boundary.text, "go home.");
        assert_eq!(boundary.overlap, 0);
    }

    #[test]
    fn test_retained_tail_overlap_source() {
        let policy = SegmentPolicy {
            overlap_source: OverlapSource::RetainedTail,
            ..policy()
        };
        let boundary = join_utterance("我们今天去爬山，然后", "去爬山，然后吃饭。", &policy);
        assert_eq!(boundary.previous, "我们今天去爬山，");
        assert_eq!(boundary.text, "然后吃饭。");
        assert_eq!(boundary.overlap, 4);
    }

    #[test]
    fn test_overlap_window_prefers_longest_match() {
        assert_eq!(find_overlap("abcabc", "abcabcd", &policy()), 6);
        assert_eq!(find_overlap("xxabc", "abcdef", &policy()), 3);
        assert_eq!(find_overlap("ab", "ab", &policy()), 0);
    }

    #[test]
    fn test_last_punctuation_index() {
        assert_eq!(last_punctuation("a,b.c", &policy()), Some(3));
        assert_eq!(last_punctuation("abc", &policy()), None);
    }

    #[test]
    fn test_transcript_interim_then_definite() {
        let mut transcript = Transcript::from_text("");
        transcript.begin_session();
        transcript.set_interim("hello wor");
        assert_eq!(transcript.text(), "hello wor");

        assert!(transcript.finalize("hello world.", &policy(), true).is_none());
        assert_eq!(transcript.text(), "hello world.\n");
        assert_eq!(transcript.interim(), "");
    }

    #[test]
    fn test_transcript_repairs_previous_utterance() {
        let mut transcript = Transcript::from_text("");
        transcript.begin_session();
        transcript.finalize("今天天气很好，我们去", &policy(), true);
        let boundary = transcript.finalize("我们去爬山了。", &policy(), true).unwrap();

        assert!(boundary.truncated);
        assert_eq!(transcript.lines(), ["今天天气很好，", "爬山了。", ""]);
    }

    #[test]
    fn test_transcript_skips_repair_when_asked() {
        let mut transcript = Transcript::from_text("intro.");
        transcript.begin_session();
        assert_eq!(transcript.repairable_span(), None);

        transcript.finalize("今天天气很好我们去", &policy(), true);
        assert_eq!(transcript.repairable_span(), Some((7, 16)));

        assert!(transcript.finalize("我们去爬山了。", &policy(), false).is_none());
        assert_eq!(transcript.lines(), ["intro.", "今天天气很好我们去", "我们去爬山了。", ""]);
    }

    #[test]
    fn test_transcript_leaves_loaded_lines_alone() {
        let mut transcript = Transcript::from_text("loaded without punctuation");
        transcript.begin_session();
        assert_eq!(transcript.lines().len(), 2);

        assert!(transcript.finalize("new speech.", &policy(), true).is_none());
        assert_eq!(transcript.lines()[0], "loaded without punctuation");
    }

    #[test]
    fn test_open_write_head_reuses_blank_line() {
        let mut transcript = Transcript::from_text("a\n");
        assert!(!transcript.open_write_head());
        transcript.set_interim("b");
        assert!(transcript.open_write_head());
        assert_eq!(transcript.text(), "a\nb\n");
    }

    #[test]
    fn test_sanitize_utterance() {
        assert_eq!(sanitize_utterance("a\nb\r\nc"), "a b  c");
    }
}
