//! Block list: the renderable view of a note.
//!
//! Content blocks correspond one-to-one with the lines of the document text,
//! in order. Three kinds of blocks sit outside that mapping:
//!
//! - `note-info`: metadata header, always first
//! - `summary`: AI summaries, carried in the list but not in the document text
//! - `buffer`: an empty trailing block that only reserves scroll space
//!
//! The list is never rebuilt from scratch while a note is open. Each applied
//! operation adjusts the line structure (`apply_operation`) so block ids stay
//! stable across edits, which is what lets the surface keep its cursor.

use crate::operation::{char_len, char_slice, OpKind, Operation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Marks the start of a summary block in persisted text.
pub const SUMMARY_START: &str = "[SUMMARY_BLOCK_START]";
/// Marks the end of a summary block in persisted text.
pub const SUMMARY_END: &str = "[SUMMARY_BLOCK_END]";

pub type BlockId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    NoteInfo,
    Paragraph,
    H1,
    H2,
    H3,
    BulletedList,
    NumberedList,
    Code,
    Summary,
    Buffer,
}

impl BlockKind {
    /// Whether blocks of this kind are lines of the document text.
    pub fn is_content(self) -> bool {
        !matches!(self, Self::NoteInfo | Self::Summary | Self::Buffer)
    }
}

/// Header metadata for a note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub related_people: String,
    #[serde(default)]
    pub location: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
}

impl NoteInfo {
    pub fn started_at(start_time: u64) -> Self {
        Self {
            start_time,
            ..Self::default()
        }
    }

    /// One-line summary shown when the header is collapsed.
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if !self.title.is_empty() {
            parts.push(format!("📌 {}", self.title));
        }
        if !self.kind.is_empty() {
            parts.push(format!("🏷️ {}", self.kind));
        }
        if !self.related_people.is_empty() {
            parts.push(format!("👥 {}", self.related_people));
        }
        if !self.location.is_empty() {
            parts.push(format!("📍 {}", self.location));
        }
        parts.push(format!("⏰ {}", self.start_time));
        if let Some(end) = self.end_time {
            parts.push(format!("⏱️ {}", end));
        }
        parts.join(" · ")
    }
}

/// A single renderable segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub content: String,
    /// Set on the single block receiving live ASR text; the surface must not
    /// let the human edit it.
    #[serde(default)]
    pub is_asr_writing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_info: Option<NoteInfo>,
}

impl Block {
    fn new(kind: BlockKind, content: impl Into<String>) -> Self {
        Self {
            id: format!("block-{}", Uuid::new_v4()),
            kind,
            content: content.into(),
            is_asr_writing: false,
            start_time: None,
            end_time: None,
            note_info: None,
        }
    }

    pub fn paragraph(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Paragraph, content)
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Summary, content)
    }

    pub fn buffer() -> Self {
        Self::new(BlockKind::Buffer, "")
    }

    pub fn note_info(info: NoteInfo) -> Self {
        Self {
            note_info: Some(info),
            ..Self::new(BlockKind::NoteInfo, "")
        }
    }

    pub fn is_content(&self) -> bool {
        self.kind.is_content()
    }

    pub fn is_summary(&self) -> bool {
        self.kind == BlockKind::Summary
    }

    pub fn is_buffer_block(&self) -> bool {
        self.kind == BlockKind::Buffer
    }
}

/// Ordered blocks of one note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockList {
    blocks: Vec<Block>,
}

impl BlockList {
    /// Empty note: header, one empty paragraph, buffer.
    pub fn new(info: NoteInfo) -> Self {
        let mut list = Self {
            blocks: vec![Block::note_info(info), Block::paragraph("")],
        };
        list.ensure_buffer_block();
        list
    }

    /// Rebuild a note from persisted text.
    ///
    /// Returns the list and the document text its content blocks spell out.
    /// Summary sentinels are turned back into summary blocks, including
    /// summaries whose body spans several lines.
    pub fn from_persisted(text: &str, info: NoteInfo) -> (Self, String) {
        let mut blocks = vec![Block::note_info(info)];
        let mut summary: Option<Vec<&str>> = None;

        for line in text.split('\n') {
            if let Some(lines) = summary.as_mut() {
                match line.strip_suffix(SUMMARY_END) {
                    Some(last) => {
                        lines.push(last);
                        blocks.push(Block::summary(lines.join("\n")));
                        summary = None;
                    }
                    None => lines.push(line),
                }
                continue;
            }

            match line.strip_prefix(SUMMARY_START) {
                Some(rest) => match rest.strip_suffix(SUMMARY_END) {
                    Some(body) => blocks.push(Block::summary(body)),
                    None => summary = Some(vec![rest]),
                },
                None => blocks.push(Block::paragraph(line)),
            }
        }

        // Unterminated summary: keep its text as a summary anyway
        if let Some(lines) = summary {
            warn!("Unterminated summary block in persisted text");
            blocks.push(Block::summary(lines.join("\n")));
        }

        if !blocks.iter().any(Block::is_content) {
            blocks.push(Block::paragraph(""));
        }

        let mut list = Self { blocks };
        list.ensure_buffer_block();
        let text = list.content_text();
        (list, text)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    /// Indices (into the block vector) of content blocks, in line order.
    fn line_indices(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_content())
            .map(|(i, _)| i)
            .collect()
    }

    /// Document text spelled out by the content blocks.
    pub fn content_text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.is_content())
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Line number of a content block.
    pub fn line_of_block(&self, id: &str) -> Option<usize> {
        self.blocks
            .iter()
            .filter(|b| b.is_content())
            .position(|b| b.id == id)
    }

    /// Content block holding a given line.
    pub fn block_at_line(&self, line: usize) -> Option<&Block> {
        self.blocks.iter().filter(|b| b.is_content()).nth(line)
    }

    /// Document text with one content block's line replaced.
    pub fn text_with_block_content(&self, id: &str, content: &str) -> Option<String> {
        self.get(id).filter(|b| b.is_content())?;
        let text = self
            .blocks
            .iter()
            .filter(|b| b.is_content())
            .map(|b| if b.id == id { content } else { b.content.as_str() })
            .collect::<Vec<_>>()
            .join("\n");
        Some(text)
    }

    /// Mirror an operation that was just applied to the document text.
    ///
    /// Line breaks removed by the operation merge the following blocks into
    /// the line where it starts; inserted line breaks open fresh paragraphs
    /// after that line (or before it, when a whole line is inserted at a line
    /// start). Contents are then refreshed from `new_text`.
    pub fn apply_operation(&mut self, old_text: &str, op: &Operation, new_text: &str) {
        let old_len = char_len(old_text);
        let pos = op.position.min(old_len);

        let (removed, inserted) = match &op.kind {
            OpKind::Insert { text } => ("", text.as_str()),
            OpKind::Delete { length } => (char_slice(old_text, pos, pos + length), ""),
            OpKind::Replace { text, old_text: expected } => (
                char_slice(old_text, pos, pos + char_len(expected)),
                text.as_str(),
            ),
        };

        let removed_breaks = removed.matches('\n').count();
        let inserted_breaks = inserted.matches('\n').count();

        if removed_breaks > 0 || inserted_breaks > 0 {
            let lines = self.line_indices();
            let line = char_slice(old_text, 0, pos).matches('\n').count();

            for k in (1..=removed_breaks).rev() {
                if let Some(&idx) = lines.get(line + k) {
                    self.blocks.remove(idx);
                }
            }

            if inserted_breaks > 0 {
                let anchor = lines
                    .get(line)
                    .copied()
                    .unwrap_or_else(|| self.blocks.len().saturating_sub(1));
                let at_line_start = pos == 0 || char_slice(old_text, pos - 1, pos) == "\n";
                let before = at_line_start && removed_breaks == 0 && inserted.ends_with('\n');
                let insert_at = if before { anchor } else { (anchor + 1).min(self.blocks.len()) };

                for _ in 0..inserted_breaks {
                    self.blocks.insert(insert_at, Block::paragraph(""));
                }
            }
        }

        self.refresh_contents(new_text);
    }

    /// Assign each line of `text` to the content block at the same position.
    ///
    /// A count mismatch means the structure drifted from the text; blocks are
    /// added or dropped at the end so the mapping holds again.
    pub fn refresh_contents(&mut self, text: &str) {
        let lines: Vec<&str> = text.split('\n').collect();
        let mut indices = self.line_indices();

        if indices.len() != lines.len() {
            warn!(
                "Block structure out of step with text ({} blocks, {} lines), repairing",
                indices.len(),
                lines.len()
            );
            while indices.len() > lines.len() {
                if let Some(idx) = indices.pop() {
                    self.blocks.remove(idx);
                }
            }
            while indices.len() < lines.len() {
                let at = self
                    .blocks
                    .iter()
                    .rposition(|b| !b.is_buffer_block())
                    .map(|i| i + 1)
                    .unwrap_or(0);
                self.blocks.insert(at, Block::paragraph(""));
                indices = self.line_indices();
            }
        }

        for (idx, line) in indices.into_iter().zip(lines) {
            if self.blocks[idx].content != line {
                self.blocks[idx].content = line.to_string();
            }
        }
        self.ensure_buffer_block();
    }

    /// The block currently receiving ASR text.
    pub fn write_head(&self) -> Option<&Block> {
        self.blocks.iter().find(|b| b.is_asr_writing)
    }

    /// Make the content block at `line` the only ASR write-head.
    pub fn set_write_head_line(&mut self, line: usize) -> Option<BlockId> {
        let idx = *self.line_indices().get(line)?;
        for block in self.blocks.iter_mut() {
            block.is_asr_writing = false;
        }
        self.blocks[idx].is_asr_writing = true;
        Some(self.blocks[idx].id.clone())
    }

    pub fn clear_write_head(&mut self) {
        for block in self.blocks.iter_mut() {
            block.is_asr_writing = false;
        }
    }

    /// Record utterance timing on a content line.
    pub fn set_timing(&mut self, line: usize, start: Option<u64>, end: Option<u64>) {
        if let Some(&idx) = self.line_indices().get(line) {
            let block = &mut self.blocks[idx];
            if block.start_time.is_none() {
                block.start_time = start;
            }
            if end.is_some() {
                block.end_time = end;
            }
        }
    }

    /// Append a summary block before the buffer.
    pub fn insert_summary(&mut self, content: &str) -> BlockId {
        let block = Block::summary(content);
        let id = block.id.clone();
        let at = self
            .blocks
            .iter()
            .rposition(|b| !b.is_buffer_block())
            .map(|i| i + 1)
            .unwrap_or(0);
        self.blocks.insert(at, block);
        self.ensure_buffer_block();
        id
    }

    /// Replace a summary block's content.
    pub fn set_summary_content(&mut self, id: &str, content: &str) -> bool {
        match self.index_of(id) {
            Some(idx) if self.blocks[idx].is_summary() => {
                self.blocks[idx].content = content.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn note_info(&self) -> Option<&NoteInfo> {
        self.blocks.iter().find_map(|b| b.note_info.as_ref())
    }

    pub fn note_info_mut(&mut self) -> Option<&mut NoteInfo> {
        self.blocks.iter_mut().find_map(|b| b.note_info.as_mut())
    }

    /// Keep exactly one buffer block, at the end.
    pub fn ensure_buffer_block(&mut self) {
        let misplaced = self
            .blocks
            .iter()
            .enumerate()
            .any(|(i, b)| b.is_buffer_block() && i + 1 != self.blocks.len());
        if misplaced {
            self.blocks.retain(|b| !b.is_buffer_block());
        }
        if !self.blocks.last().is_some_and(Block::is_buffer_block) {
            self.blocks.push(Block::buffer());
        }
    }

    /// Blocks safe to persist: not being written by ASR and not under edit.
    pub fn stable_blocks(&self, editing: Option<&str>) -> Vec<Block> {
        self.blocks
            .iter()
            .filter(|b| !b.is_asr_writing && Some(b.id.as_str()) != editing)
            .cloned()
            .collect()
    }
}

/// Flatten blocks into the persisted text format.
///
/// Header and buffer blocks are skipped, summaries are wrapped in sentinels,
/// and blank lines are dropped.
pub fn to_persisted_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| b.kind != BlockKind::NoteInfo && !b.is_buffer_block())
        .map(|b| {
            if b.is_summary() {
                format!("{}{}{}", SUMMARY_START, b.content, SUMMARY_END)
            } else {
                b.content.clone()
            }
        })
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether there is anything worth saving: a header alone does not count.
pub fn has_content(blocks: &[Block]) -> bool {
    blocks
        .iter()
        .any(|b| b.kind != BlockKind::NoteInfo && !b.is_buffer_block() && !b.content.trim().is_empty())
}
