//! Per-Disk Flushers
//!
//! One `Flusher` exists per local mount (plus one for the distributed
//! store). Each owns a pool of reusable flush buffers, the shared
//! outstanding-byte tracker, and a small set of drain workers. A worker is
//! a single task pulling from a bounded FIFO queue and executing flush
//! tasks strictly in submission order. Every writer pins itself to one
//! worker index at construction, which is what guarantees per-writer flush
//! order without any cross-writer coordination.
//!
//! Back-pressure shows up in two places:
//! - `take_buffer` blocks up to the configured bound when the pool is
//!   drained and returns `None` past it (the caller poisons its writer);
//! - `submit` blocks up to the caller's deadline when the task queue is
//!   full and hands the task back on timeout so its buffer can be
//!   recovered.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use shufflehouse_core::DiskKind;

use crate::config::FlushConfig;
use crate::memory::MemoryTracker;
use crate::pool::{BufferPool, CompositeBuffer};
use crate::task::FlushTask;

pub enum FlusherKind {
    Local {
        mount_point: String,
        disk_kind: DiskKind,
    },
    Dfs,
}

pub struct Flusher {
    kind: FlusherKind,
    workers: Vec<mpsc::Sender<FlushTask>>,
    pool: Arc<BufferPool>,
    tracker: Arc<MemoryTracker>,
    next_worker: AtomicUsize,
    buffer_timeout: Duration,
}

impl Flusher {
    pub fn new_local(
        mount_point: impl Into<String>,
        disk_kind: DiskKind,
        config: &FlushConfig,
        tracker: Arc<MemoryTracker>,
    ) -> Arc<Self> {
        Self::new(
            FlusherKind::Local {
                mount_point: mount_point.into(),
                disk_kind,
            },
            config,
            tracker,
        )
    }

    pub fn new_dfs(config: &FlushConfig, tracker: Arc<MemoryTracker>) -> Arc<Self> {
        Self::new(FlusherKind::Dfs, config, tracker)
    }

    fn new(kind: FlusherKind, config: &FlushConfig, tracker: Arc<MemoryTracker>) -> Arc<Self> {
        let pool = Arc::new(BufferPool::new(config.buffers_per_flusher.max(1)));
        let worker_count = config.workers_per_flusher.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for worker in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<FlushTask>(config.flush_queue_capacity.max(1));
            let pool = pool.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    task.run(&pool, &tracker).await;
                }
                tracing::debug!(worker, "flush worker queue closed, draining stopped");
            });
            workers.push(tx);
        }

        Arc::new(Self {
            kind,
            workers,
            pool,
            tracker,
            next_worker: AtomicUsize::new(0),
            buffer_timeout: Duration::from_millis(config.buffer_timeout_ms),
        })
    }

    /// Round-robin assignment of a new writer to a drain worker. The writer
    /// keeps this index for life so all its flushes stay ordered.
    pub fn pick_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Borrow a zero-length buffer, waiting up to the configured bound.
    /// `None` means the pool stayed drained; the caller must poison its
    /// writer.
    pub async fn take_buffer(&self) -> Option<CompositeBuffer> {
        self.pool.acquire(self.buffer_timeout).await
    }

    /// Return a buffer to the pool. Safe from any thread.
    pub fn return_buffer(&self, buffer: CompositeBuffer) {
        self.pool.release(buffer);
    }

    /// Enqueue a task on the given worker, waiting up to `wait` for queue
    /// space. On timeout (or a stopped worker) the task is handed back so
    /// the caller can recover its buffer.
    pub async fn submit(
        &self,
        task: FlushTask,
        wait: Duration,
        worker_index: usize,
    ) -> std::result::Result<(), FlushTask> {
        let worker = &self.workers[worker_index % self.workers.len()];
        match worker.send_timeout(task, wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(task)) | Err(SendTimeoutError::Closed(task)) => Err(task),
        }
    }

    /// Human-readable pool state for poisoning diagnostics.
    pub fn queue_info(&self) -> String {
        format!(
            "{}/{} flush buffers available",
            self.pool.available(),
            self.pool.capacity()
        )
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, FlusherKind::Local { .. })
    }

    pub fn mount_point(&self) -> Option<&str> {
        match &self.kind {
            FlusherKind::Local { mount_point, .. } => Some(mount_point),
            FlusherKind::Dfs => None,
        }
    }

    pub fn disk_kind(&self) -> Option<DiskKind> {
        match &self.kind {
            FlusherKind::Local { disk_kind, .. } => Some(*disk_kind),
            FlusherKind::Dfs => None,
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }
}
