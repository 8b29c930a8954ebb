//! Snapshot storage policy.
//!
//! Decides whether a new version is persisted in full or as a differential.
//! The cadence and size thresholds are tunable; the defaults bound replay
//! depth and keep oversized differentials off disk.

use crate::types::{ChangeType, Version};
use std::time::Duration;

/// Policy parameters for full-vs-differential storage and debouncing.
#[derive(Clone, Debug)]
pub struct SnapshotPolicy {
    /// Every Nth version is stored in full to bound replay depth.
    pub full_interval: u32,

    /// Trees with more files than this are always stored in full.
    pub full_file_threshold: usize,

    /// Quiet period before a burst of mutations becomes one snapshot.
    pub debounce: Duration,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            full_interval: 10,
            full_file_threshold: 100,
            debounce: Duration::from_millis(2000),
        }
    }
}

impl SnapshotPolicy {
    /// Decide whether the snapshot for `version` must be stored in full.
    ///
    /// In priority order: initial snapshots and version 1 are always full,
    /// then the periodic cadence, then the file-count threshold. Everything
    /// else is differential.
    pub fn should_be_full(
        &self,
        version: Version,
        change_type: ChangeType,
        file_count: usize,
    ) -> bool {
        if change_type == ChangeType::Initial || version == Version::FIRST {
            return true;
        }
        if self.full_interval > 0 && version.0 % self.full_interval == 0 {
            return true;
        }
        file_count > self.full_file_threshold
    }
}
