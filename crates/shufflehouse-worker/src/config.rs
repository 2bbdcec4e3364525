//! Worker Configuration
//!
//! Control-plane settings layered over the write-path `FlushConfig`:
//!
//! - **shuffle_commit_timeout_secs**: wall-clock deadline for one commit
//!   fan-out across every writer of a shuffle (default: 120 s)
//! - **min_partition_size_to_estimate**: committed partitions at least this
//!   large are reported for cluster-wide partition-size estimation
//!   (default: 8 MiB)

use serde::{Deserialize, Serialize};
use shufflehouse_storage::FlushConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deadline for a whole commit fan-out (default: 120 s)
    #[serde(default = "default_shuffle_commit_timeout_secs")]
    pub shuffle_commit_timeout_secs: u64,

    /// Minimum committed size reported for size estimation (default: 8 MiB)
    #[serde(default = "default_min_partition_size_to_estimate")]
    pub min_partition_size_to_estimate: u64,

    /// Write-path settings shared with the storage manager.
    #[serde(default)]
    pub flush: FlushConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shuffle_commit_timeout_secs: default_shuffle_commit_timeout_secs(),
            min_partition_size_to_estimate: default_min_partition_size_to_estimate(),
            flush: FlushConfig::default(),
        }
    }
}

fn default_shuffle_commit_timeout_secs() -> u64 {
    120
}

fn default_min_partition_size_to_estimate() -> u64 {
    8 * 1024 * 1024 // 8 MiB
}
