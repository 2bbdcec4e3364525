//! Outstanding Disk-Buffer Accounting
//!
//! A single gauge of bytes accepted by writers but not yet flushed to their
//! sinks. Writers increment it on every accepted write; flusher workers
//! release it after each task lands. The external memory manager watches the
//! gauge and calls `flush_on_memory_pressure` on writers when it needs the
//! outstanding bytes to drop.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MemoryTracker {
    disk_buffer_bytes: AtomicU64,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_disk_buffer(&self, bytes: u64) {
        self.disk_buffer_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn release_disk_buffer(&self, bytes: u64) {
        self.disk_buffer_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn disk_buffer_bytes(&self) -> u64 {
        self.disk_buffer_bytes.load(Ordering::Relaxed)
    }
}
