//! Engine policy: quiet periods and segmentation heuristics.
//!
//! Every field has a default so a partial JSON document is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which part of a truncated utterance the next definite result is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapSource {
    /// The fragment cut off after the last punctuation mark
    DiscardedTail,
    /// The end of what remains after truncation
    RetainedTail,
}

/// Configuration injected into the reconciler at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quiet period after a keystroke before the edit session ends
    #[serde(default = "default_edit_quiet_ms")]
    pub edit_quiet_ms: u64,

    /// Quiet period after the editing surface loses focus
    #[serde(default = "default_blur_quiet_ms")]
    pub blur_quiet_ms: u64,

    /// Debounce for pushing edited text to the backend sync endpoint
    #[serde(default = "default_sync_quiet_ms")]
    pub sync_quiet_ms: u64,

    /// Debounce for automatic saves after utterances and edits
    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,

    /// Interval between periodic saves while recording (0 disables)
    #[serde(default = "default_periodic_save_ms")]
    pub periodic_save_ms: u64,

    /// Segmentation heuristics
    #[serde(default)]
    pub segment: SegmentPolicy,
}

/// Utterance-boundary heuristics used by the block segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentPolicy {
    /// Characters that end a sentence or clause
    #[serde(default = "default_punctuation")]
    pub punctuation: String,

    /// How many trailing characters of the previous block are checked for punctuation
    #[serde(default = "default_tail_check_chars")]
    pub tail_check_chars: usize,

    /// Longest overlap tried when deduplicating a restated fragment
    #[serde(default = "default_overlap_max")]
    pub overlap_max: usize,

    /// Shortest overlap that counts as a restatement
    #[serde(default = "default_overlap_min")]
    pub overlap_min: usize,

    #[serde(default = "default_overlap_source")]
    pub overlap_source: OverlapSource,
}

impl SegmentPolicy {
    pub fn is_punctuation(&self, c: char) -> bool {
        self.punctuation.contains(c)
    }
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self {
            punctuation: default_punctuation(),
            tail_check_chars: default_tail_check_chars(),
            overlap_max: default_overlap_max(),
            overlap_min: default_overlap_min(),
            overlap_source: default_overlap_source(),
        }
    }
}

impl EngineConfig {
    pub fn edit_quiet(&self) -> Duration {
        Duration::from_millis(self.edit_quiet_ms)
    }

    pub fn blur_quiet(&self) -> Duration {
        Duration::from_millis(self.blur_quiet_ms)
    }

    pub fn sync_quiet(&self) -> Duration {
        Duration::from_millis(self.sync_quiet_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn periodic_save(&self) -> Option<Duration> {
        (self.periodic_save_ms > 0).then(|| Duration::from_millis(self.periodic_save_ms))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            edit_quiet_ms: default_edit_quiet_ms(),
            blur_quiet_ms: default_blur_quiet_ms(),
            sync_quiet_ms: default_sync_quiet_ms(),
            autosave_debounce_ms: default_autosave_debounce_ms(),
            periodic_save_ms: default_periodic_save_ms(),
            segment: SegmentPolicy::default(),
        }
    }
}

fn default_edit_quiet_ms() -> u64 {
    1500
}

fn default_blur_quiet_ms() -> u64 {
    500
}

fn default_sync_quiet_ms() -> u64 {
    1000
}

fn default_autosave_debounce_ms() -> u64 {
    3000
}

fn default_periodic_save_ms() -> u64 {
    60_000
}

fn default_punctuation() -> String {
    "。！？；：，、.!?;:,".to_string()
}

fn default_tail_check_chars() -> usize {
    2
}

fn default_overlap_max() -> usize {
    30
}

fn default_overlap_min() -> usize {
    3
}

fn default_overlap_source() -> OverlapSource {
    OverlapSource::DiscardedTail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"edit_quiet_ms": 800}"#).unwrap();
        assert_eq!(config.edit_quiet(), Duration::from_millis(800));
        assert_eq!(config.sync_quiet(), Duration::from_millis(1000));
        assert_eq!(config.segment.overlap_max, 30);
        assert_eq!(config.segment.overlap_source, OverlapSource::DiscardedTail);
    }

    #[test]
    fn test_punctuation_set() {
        let policy = SegmentPolicy::default();
        assert!(policy.is_punctuation('。'));
        assert!(policy.is_punctuation(','));
        assert!(!policy.is_punctuation('a'));
        assert!(!policy.is_punctuation(' '));
    }

    #[test]
    fn test_periodic_save_can_be_disabled() {
        let config = EngineConfig {
            periodic_save_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.periodic_save().is_none());
    }
}
