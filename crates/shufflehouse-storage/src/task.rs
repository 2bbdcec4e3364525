//! Flush Tasks
//!
//! The unit of work handed from a writer to its flusher: one gathered
//! buffer, the shared sink it drains into, and the writer's notifier.
//! Immutable once submitted.
//!
//! Execution contract: drain the buffer into the sink as one logical append;
//! release the buffer back to the pool and settle the outstanding-byte gauge
//! regardless of outcome; on failure record the error on the notifier
//! *before* decrementing the pending count, so a waiter waking on
//! count == 0 observes the error.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::memory::MemoryTracker;
use crate::notifier::FlushNotifier;
use crate::pool::{BufferPool, CompositeBuffer};
use crate::sink::Sink;

pub struct FlushTask {
    buffer: CompositeBuffer,
    sink: Arc<Mutex<Sink>>,
    notifier: Arc<FlushNotifier>,
}

impl FlushTask {
    pub fn new(buffer: CompositeBuffer, sink: Arc<Mutex<Sink>>, notifier: Arc<FlushNotifier>) -> Self {
        Self {
            buffer,
            sink,
            notifier,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Recover the buffer from a task that could not be enqueued.
    pub(crate) fn into_buffer(self) -> CompositeBuffer {
        self.buffer
    }

    pub(crate) async fn run(self, pool: &BufferPool, tracker: &MemoryTracker) {
        let Self {
            buffer,
            sink,
            notifier,
        } = self;
        let bytes = buffer.len() as u64;

        let result = {
            let mut sink = sink.lock().await;
            sink.append(&buffer).await
        };
        pool.release(buffer);
        tracker.release_disk_buffer(bytes);

        if let Err(error) = result {
            tracing::error!(error = %error, "flush task failed");
            notifier.set_error(error);
        }
        notifier.dec_pending();
    }
}
