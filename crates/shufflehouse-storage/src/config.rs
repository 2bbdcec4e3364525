//! Write-Path Configuration
//!
//! Controls buffering, flushing, and close behavior for partition writers:
//!
//! - **flush_buffer_size**: submit the current buffer to the flusher once the
//!   next write would reach this size (default: 256 KiB)
//! - **chunk_size**: record a chunk offset whenever the flushed byte count
//!   crosses a multiple of this (default: 8 MiB)
//! - **close_timeout_ms**: deadline for draining pending writes and pending
//!   flushes at close, also the bound on flush-task enqueue (default: 120 s)
//! - **buffer_timeout_ms**: bound on borrowing a buffer from the pool
//!   (default: 5 s); exhaustion past this poisons the writer
//! - **flush_queue_capacity / buffers_per_flusher / workers_per_flusher**:
//!   sizing of each flusher's task queues and buffer pool
//! - **split_threshold / split_mode / partition_type / range_read_filter**:
//!   partition attributes carried by each writer

use serde::{Deserialize, Serialize};
use shufflehouse_core::{PartitionSplitMode, PartitionType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Buffer size that triggers a non-final flush (default: 256 KiB)
    #[serde(default = "default_flush_buffer_size")]
    pub flush_buffer_size: usize,

    /// Byte spacing between recorded chunk offsets (default: 8 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Deadline for the close drain phases (default: 120 s)
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Bound on borrowing a flush buffer from the pool (default: 5 s)
    #[serde(default = "default_buffer_timeout_ms")]
    pub buffer_timeout_ms: u64,

    /// Per-worker flush task queue bound (default: 1024)
    #[serde(default = "default_flush_queue_capacity")]
    pub flush_queue_capacity: usize,

    /// Number of pooled flush buffers per flusher (default: 8)
    #[serde(default = "default_buffers_per_flusher")]
    pub buffers_per_flusher: usize,

    /// Number of drain workers per flusher (default: 1)
    #[serde(default = "default_workers_per_flusher")]
    pub workers_per_flusher: usize,

    /// Partition size at which the layer above splits to a new file
    /// (default: 1 GiB)
    #[serde(default = "default_split_threshold")]
    pub split_threshold: u64,

    /// How a full partition splits to a new file (default: Soft)
    #[serde(default)]
    pub split_mode: PartitionSplitMode,

    /// Which side of the exchange the partition belongs to (default: Reduce)
    #[serde(default)]
    pub partition_type: PartitionType,

    /// Track a presence bitmap of producer map ids per file (default: off)
    #[serde(default)]
    pub range_read_filter: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            flush_buffer_size: default_flush_buffer_size(),
            chunk_size: default_chunk_size(),
            close_timeout_ms: default_close_timeout_ms(),
            buffer_timeout_ms: default_buffer_timeout_ms(),
            flush_queue_capacity: default_flush_queue_capacity(),
            buffers_per_flusher: default_buffers_per_flusher(),
            workers_per_flusher: default_workers_per_flusher(),
            split_threshold: default_split_threshold(),
            split_mode: PartitionSplitMode::default(),
            partition_type: PartitionType::default(),
            range_read_filter: false,
        }
    }
}

fn default_flush_buffer_size() -> usize {
    256 * 1024 // 256 KiB
}

fn default_chunk_size() -> u64 {
    8 * 1024 * 1024 // 8 MiB
}

fn default_close_timeout_ms() -> u64 {
    120_000
}

fn default_buffer_timeout_ms() -> u64 {
    5_000
}

fn default_flush_queue_capacity() -> usize {
    1024
}

fn default_buffers_per_flusher() -> usize {
    8
}

fn default_workers_per_flusher() -> usize {
    1
}

fn default_split_threshold() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}
