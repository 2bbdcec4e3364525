//! Pooled Composite Flush Buffers
//!
//! Incoming record buffers are reference-counted `Bytes`. A writer gathers
//! them into a `CompositeBuffer`, a list of retained slices rather than a
//! copy, and a flush drains the gathered segments into the sink with
//! sequential appends.
//!
//! Buffers come from a fixed-population `BufferPool` owned by each flusher.
//! A buffer is always in exactly one place: the pool, one writer's hands, or
//! one in-flight flush task. Borrowing blocks up to a bound when the pool is
//! drained; a `None` result is a recoverable signal that the caller must
//! poison its writer rather than allocate unboundedly.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A gather list of reference-counted byte slices.
///
/// `append` retains the incoming slice without copying; `clear` drops the
/// retained slices but keeps the list allocation for reuse through the pool.
#[derive(Debug, Default)]
pub struct CompositeBuffer {
    segments: Vec<Bytes>,
    len: usize,
}

impl CompositeBuffer {
    pub fn new() -> Self {
        Self {
            segments: Vec::with_capacity(16),
            len: 0,
        }
    }

    pub fn append(&mut self, data: Bytes) {
        self.len += data.len();
        self.segments.push(data);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }
}

/// Fixed-population pool of reusable composite buffers.
pub struct BufferPool {
    buffers: Mutex<VecDeque<CompositeBuffer>>,
    notify: Notify,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        let mut buffers = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            buffers.push_back(CompositeBuffer::new());
        }
        Self {
            buffers: Mutex::new(buffers),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Borrow a buffer, waiting up to `wait` when the pool is drained.
    ///
    /// Returns `None` on timeout; the caller must treat that as a poison
    /// signal, not retry in a loop.
    pub async fn acquire(&self, wait: Duration) -> Option<CompositeBuffer> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(buffer) = self.pop() {
                return Some(buffer);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if tokio::time::timeout(deadline - now, self.notify.notified())
                .await
                .is_err()
            {
                // deadline hit while parked; one last opportunistic check
                return self.pop();
            }
        }
    }

    /// Return a buffer to the pool. Safe from any thread; the buffer is
    /// cleared before it becomes borrowable again.
    pub fn release(&self, mut buffer: CompositeBuffer) {
        buffer.clear();
        self.lock().push_back(buffer);
        self.notify.notify_one();
    }

    pub fn available(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn pop(&self) -> Option<CompositeBuffer> {
        self.lock().pop_front()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<CompositeBuffer>> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
