//! Cursor anchors that survive document mutations.
//!
//! A surface captures the caret as `(block id, offset)` before applying a
//! snapshot and restores it afterwards. Block ids are stable across edits,
//! so the caret stays in its block even when ASR text lands elsewhere.

use crate::blocks::{BlockId, BlockList};
use crate::operation::char_len;
use serde::{Deserialize, Serialize};

/// Caret position expressed relative to a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub block_id: BlockId,
    /// Character offset into the block's content
    pub offset: usize,
}

impl Anchor {
    /// Capture a caret. Returns `None` if the block does not exist.
    pub fn capture(blocks: &BlockList, block_id: &str, offset: usize) -> Option<Self> {
        let block = blocks.get(block_id)?;
        Some(Self {
            block_id: block.id.clone(),
            offset: offset.min(char_len(&block.content)),
        })
    }

    /// Re-resolve against the current list, clamping to the new content length.
    pub fn restore(&self, blocks: &BlockList) -> Option<Self> {
        let block = blocks.get(&self.block_id)?;
        Some(Self {
            block_id: block.id.clone(),
            offset: self.offset.min(char_len(&block.content)),
        })
    }
}
