//! Partition Writer
//!
//! One `PartitionWriter` exists per partition file replica. It is the state
//! machine at the center of the write path:
//!
//! - **Accepting writes**: network threads announce intent with
//!   `increment_pending_writes`, then call `write` with a retained record
//!   buffer. The record is gathered into the current pooled buffer with no
//!   copy; the pending-writes counter is reconciled inside the same
//!   critical section, so "pending" always means "promised but not yet in
//!   the buffer".
//! - **Flushing**: once the next write would reach `flush_buffer_size`, the
//!   current buffer is packaged into a flush task, submitted to the
//!   writer's pinned flusher worker, and a fresh buffer is borrowed. The
//!   single drain worker keeps per-writer flush order.
//! - **Chunk accounting**: after every flush the writer records a chunk
//!   offset when the flushed byte count crossed the next boundary (always
//!   on the final flush), and close guarantees the table ends exactly at
//!   the flushed length.
//! - **Quiescence on close**: close drains pending writes, submits the
//!   tail, and drains pending flushes, all under one deadline; then it
//!   closes the sink and (on the distributed store) publishes the success
//!   marker and index sidecar, unless a peer replica already published
//!   first.
//! - **Poisoning**: the first error latched on the notifier makes the file
//!   unrecoverable. Later writes are dropped silently, close raises the
//!   latched error, destroy tears everything down without raising.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use roaring::RoaringBitmap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use shufflehouse_core::chunk_index::encode_chunk_index;
use shufflehouse_core::{
    DiskStatus, FileMeta, PartitionSplitMode, PartitionType, StorageInfo, StorageKind,
};

use crate::config::FlushConfig;
use crate::device::{DeviceMonitor, DeviceObserver};
use crate::error::{Error, Result};
use crate::flusher::Flusher;
use crate::memory::MemoryTracker;
use crate::notifier::{FlushNotifier, WAIT_INTERVAL};
use crate::pool::CompositeBuffer;
use crate::sink::{self, Sink};
use crate::task::FlushTask;

/// Mount label used when the file lands on the distributed store rather
/// than a local disk.
const DFS_MOUNT: &str = "<distributed-fs>";

pub struct PartitionWriter {
    path: String,
    flusher: Arc<Flusher>,
    worker_index: usize,
    notifier: Arc<FlushNotifier>,
    pending_writes: AtomicU32,
    closed: AtomicBool,
    sink: Arc<Mutex<Sink>>,
    store: Option<Arc<dyn ObjectStore>>,
    device_monitor: Arc<DeviceMonitor>,
    tracker: Arc<MemoryTracker>,
    flush_buffer_size: usize,
    chunk_size: u64,
    close_timeout: Duration,
    split_threshold: u64,
    split_mode: PartitionSplitMode,
    partition_type: PartitionType,
    range_read_filter: bool,
    state: Mutex<WriterState>,
}

struct WriterState {
    meta: FileMeta,
    flush_buffer: Option<CompositeBuffer>,
    bytes_flushed: u64,
    next_boundary: u64,
    deleted: bool,
    destroy_hook: Option<Box<dyn FnOnce() + Send>>,
}

impl PartitionWriter {
    /// Open the sink for `meta`, pin a flusher worker, borrow the first
    /// buffer, and register with device monitoring.
    ///
    /// A drained buffer pool does not fail construction: the writer comes
    /// up poisoned instead, exactly like a mid-stream exhaustion.
    pub async fn create(
        meta: FileMeta,
        flusher: Arc<Flusher>,
        store: Option<Arc<dyn ObjectStore>>,
        config: &FlushConfig,
        device_monitor: Arc<DeviceMonitor>,
    ) -> Result<Arc<Self>> {
        let raw_sink = match meta.kind() {
            StorageKind::LocalDisk => Sink::open_local(PathBuf::from(meta.data_path())).await?,
            StorageKind::DistributedFs => {
                let store = store.clone().ok_or_else(|| {
                    Error::Io("distributed partition file requires an object store".to_string())
                })?;
                Sink::open_dfs(store, StorePath::from(meta.data_path())).await?
            }
        };

        let path = meta.data_path().to_string();
        let mount = flusher.mount_point().unwrap_or(DFS_MOUNT).to_string();
        let tracker = flusher.tracker().clone();
        let worker_index = flusher.pick_worker_index();

        let writer = Arc::new(Self {
            path: path.clone(),
            flusher,
            worker_index,
            notifier: Arc::new(FlushNotifier::new()),
            pending_writes: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            sink: Arc::new(Mutex::new(raw_sink)),
            store,
            device_monitor,
            tracker,
            flush_buffer_size: config.flush_buffer_size,
            chunk_size: config.chunk_size,
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            split_threshold: config.split_threshold,
            split_mode: config.split_mode,
            partition_type: config.partition_type,
            range_read_filter: config.range_read_filter,
            state: Mutex::new(WriterState {
                meta,
                flush_buffer: None,
                bytes_flushed: 0,
                next_boundary: config.chunk_size,
                deleted: false,
                destroy_hook: None,
            }),
        });

        let observer: Weak<dyn DeviceObserver> =
            Arc::downgrade(&(writer.clone() as Arc<dyn DeviceObserver>));
        writer.device_monitor.register(path, mount, observer);

        {
            let mut state = writer.state.lock().await;
            writer.take_buffer_locked(&mut state).await;
        }

        tracing::debug!(
            path = %writer.path,
            worker_index,
            split_threshold = writer.split_threshold,
            "partition writer created"
        );
        Ok(writer)
    }

    /// Announce a write before its bytes arrive. `close` waits for the
    /// counter to reach zero before draining buffers.
    pub fn increment_pending_writes(&self) {
        self.pending_writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Reconcile an announced write that will never arrive.
    pub fn decrement_pending_writes(&self) {
        self.pending_writes.fetch_sub(1, Ordering::SeqCst);
    }

    /// Accept one record buffer.
    ///
    /// The buffer is retained (reference-counted), never copied. A poisoned
    /// writer drops the data silently: the file is already unrecoverable
    /// and the commit path will surface the latched error.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            let msg = format!("partition writer for {} has already been closed", self.path);
            tracing::warn!(path = %self.path, "write rejected on closed writer");
            return Err(Error::AlreadyClosed(msg));
        }

        if self.notifier.has_error() {
            return Ok(());
        }

        let map_id = if self.range_read_filter {
            Some(read_header_map_id(&data)?)
        } else {
            None
        };

        let num_bytes = data.len();
        self.tracker.increment_disk_buffer(num_bytes as u64);

        let mut state = self.state.lock().await;
        if let Some(map_id) = map_id {
            state.meta.add_map_id(map_id);
        }

        let buffered = state.flush_buffer.as_ref().map_or(0, |b| b.len());
        if buffered != 0 && buffered + num_bytes >= self.flush_buffer_size {
            self.flush_locked(&mut state, false).await?;
            self.take_buffer_locked(&mut state).await;
        }

        if let Some(buffer) = state.flush_buffer.as_mut() {
            buffer.append(data);
        }
        // A missing buffer means the pool was exhausted a moment ago and the
        // notifier already carries the poison; the record is dropped like
        // any other poisoned write.

        self.pending_writes.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Submit the current buffer even though it is not full. Called by the
    /// external memory manager when outstanding bytes must drop.
    pub async fn flush_on_memory_pressure(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.flush_buffer.as_ref().is_some_and(|b| !b.is_empty()) {
            self.flush_locked(&mut state, false).await?;
            self.take_buffer_locked(&mut state).await;
        }
        Ok(())
    }

    /// Finalize the file and return the total bytes flushed.
    ///
    /// Order matters: drain pending writes, mark closed, submit the tail
    /// flush and fix up the chunk table, drain pending flushes, all inside
    /// the close deadline. The buffer is returned and the sink is closed on
    /// every path; the success marker and index sidecar are only published
    /// when the drain fully succeeded. Publication failures are logged and
    /// do not mask the byte count.
    pub async fn close(&self) -> Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            let msg = format!("partition writer for {} has already been closed", self.path);
            tracing::error!(path = %self.path, "close rejected on closed writer");
            return Err(Error::AlreadyClosed(msg));
        }

        let deadline = Instant::now() + self.close_timeout;
        let drained = self.drain_for_close(deadline).await;

        self.return_buffer().await;
        let sink_closed = self.close_sink(drained.is_ok()).await;
        if drained.is_ok() && sink_closed {
            if let Err(error) = self.publish_sidecars().await {
                tracing::warn!(path = %self.path, error = %error, "publishing sidecars failed");
            }
        }
        self.device_monitor.unregister(&self.path);

        drained?;
        Ok(self.state.lock().await.bytes_flushed)
    }

    /// Tear the writer down. Idempotent and infallible: every failure along
    /// the way is logged, artefact deletion is best-effort, and the
    /// one-shot destroy hook runs exactly once.
    pub async fn destroy(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notifier.set_error(Error::Destroyed);
            self.return_buffer().await;
            let mut sink = self.sink.lock().await;
            if let Err(error) = sink.abort().await {
                tracing::warn!(path = %self.path, error = %error, "aborting sink during destroy failed");
            }
        }

        self.delete_artifacts().await;
        self.device_monitor.unregister(&self.path);

        let hook = self.state.lock().await.destroy_hook.take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Install the owner's unlink callback, run once on destroy.
    pub async fn register_destroy_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.state.lock().await.destroy_hook = Some(Box::new(hook));
    }

    /// Where a committed file can be fetched from. `None` when a peer
    /// replica won the replication race and this file was deleted.
    pub async fn storage_info(&self) -> Option<StorageInfo> {
        if self.flusher.is_local() {
            let disk_kind = self.flusher.disk_kind()?;
            let mount_point = self.flusher.mount_point()?;
            Some(StorageInfo::local_disk(disk_kind, mount_point))
        } else {
            let state = self.state.lock().await;
            if state.deleted {
                None
            } else {
                Some(StorageInfo::distributed_fs(state.meta.data_path()))
            }
        }
    }

    pub async fn map_id_bitmap(&self) -> Option<RoaringBitmap> {
        self.state.lock().await.meta.map_id_bitmap().cloned()
    }

    pub async fn bytes_flushed(&self) -> u64 {
        self.state.lock().await.bytes_flushed
    }

    pub async fn chunk_offsets(&self) -> Vec<u64> {
        self.state.lock().await.meta.chunk_offsets().to_vec()
    }

    /// The first error latched on this writer, if any.
    pub fn error(&self) -> Option<Error> {
        self.notifier.error()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn data_path(&self) -> &str {
        &self.path
    }

    pub fn split_threshold(&self) -> u64 {
        self.split_threshold
    }

    pub fn split_mode(&self) -> PartitionSplitMode {
        self.split_mode
    }

    pub fn partition_type(&self) -> PartitionType {
        self.partition_type
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn drain_for_close(&self, deadline: Instant) -> Result<()> {
        self.wait_on_no_pending(&self.pending_writes, deadline, "pending writes")
            .await?;
        self.closed.store(true, Ordering::Release);

        {
            let mut state = self.state.lock().await;
            if state.flush_buffer.as_ref().is_some_and(|b| !b.is_empty()) {
                self.flush_locked(&mut state, true).await?;
            }
            // A giant tail record can be flushed without crossing the next
            // boundary; the table must still end at end-of-file.
            if state.meta.last_chunk_offset() != state.bytes_flushed {
                self.set_chunk_offset_locked(&mut state, true);
            }
        }

        self.notifier.await_drain(deadline).await
    }

    /// Submit the current buffer as a flush task. Caller holds the state
    /// lock. On enqueue timeout the buffer is recovered to the pool and the
    /// timeout becomes the writer's sticky error.
    async fn flush_locked(&self, state: &mut WriterState, final_flush: bool) -> Result<()> {
        self.notifier.check()?;
        let Some(buffer) = state.flush_buffer.take() else {
            return Ok(());
        };
        let num_bytes = buffer.len() as u64;

        self.notifier.inc_pending();
        let task = FlushTask::new(buffer, self.sink.clone(), self.notifier.clone());
        if let Err(task) = self
            .flusher
            .submit(task, self.close_timeout, self.worker_index)
            .await
        {
            let error = Error::Timeout(format!("enqueueing flush task for {}", self.path));
            self.notifier.set_error(error.clone());
            self.notifier.dec_pending();
            self.flusher.return_buffer(task.into_buffer());
            return Err(error);
        }

        state.bytes_flushed += num_bytes;
        if state.bytes_flushed >= state.next_boundary || final_flush {
            self.set_chunk_offset_locked(state, false);
        }
        Ok(())
    }

    fn set_chunk_offset_locked(&self, state: &mut WriterState, forced: bool) {
        state.meta.add_chunk_offset(state.bytes_flushed);
        state.next_boundary = state.bytes_flushed + self.chunk_size;
        if forced {
            tracing::debug!(
                path = %self.path,
                offset = state.bytes_flushed,
                "forced trailing chunk offset"
            );
        }
    }

    async fn take_buffer_locked(&self, state: &mut WriterState) {
        match self.flusher.take_buffer().await {
            Some(buffer) => state.flush_buffer = Some(buffer),
            None => {
                let error = Error::BufferExhausted(self.flusher.queue_info());
                tracing::error!(path = %self.path, error = %error, "could not borrow a flush buffer");
                self.notifier.set_error(error);
            }
        }
    }

    async fn wait_on_no_pending(
        &self,
        counter: &AtomicU32,
        deadline: Instant,
        what: &str,
    ) -> Result<()> {
        while counter.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            self.notifier.check()?;
            tokio::time::sleep(WAIT_INTERVAL).await;
        }
        if counter.load(Ordering::SeqCst) > 0 {
            let error = Error::Timeout(format!("waiting for {} on {}", what, self.path));
            self.notifier.set_error(error.clone());
            return Err(error);
        }
        self.notifier.check()
    }

    async fn return_buffer(&self) {
        let mut state = self.state.lock().await;
        if let Some(buffer) = state.flush_buffer.take() {
            // Bytes still gathered here never reached the sink; settle the
            // outstanding gauge before the buffer goes back to the pool.
            self.tracker.release_disk_buffer(buffer.len() as u64);
            self.flusher.return_buffer(buffer);
        }
    }

    /// Close (or abort) the sink handle. Failures are logged, never raised:
    /// the byte count is still the caller's answer.
    async fn close_sink(&self, drained: bool) -> bool {
        let mut sink = self.sink.lock().await;
        let result = if drained {
            sink.close().await
        } else {
            sink.abort().await
        };
        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(path = %self.path, error = %error, "closing sink failed");
                false
            }
        }
    }

    /// Distributed-store close protocol: if the peer replica's success
    /// marker exists we lost the replication race, so delete our file and
    /// publish nothing. Otherwise publish our success marker and the
    /// encoded chunk-offset index.
    async fn publish_sidecars(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut state = self.state.lock().await;
        if state.meta.kind() != StorageKind::DistributedFs {
            return Ok(());
        }

        if let Some(peer) = state.meta.peer_success_path() {
            let peer_path = StorePath::from(peer);
            if sink::dfs_exists(store.as_ref(), &peer_path).await? {
                let data_path = StorePath::from(state.meta.data_path());
                sink::dfs_delete(store.as_ref(), &data_path).await?;
                state.deleted = true;
                tracing::info!(
                    path = %self.path,
                    "peer replica already published, deleted own file"
                );
                return Ok(());
            }
        }

        let success_path = StorePath::from(state.meta.success_path());
        sink::dfs_create_marker(store.as_ref(), &success_path).await?;

        let index = encode_chunk_index(state.meta.chunk_offsets());
        let index_path = StorePath::from(state.meta.index_path());
        store.put(&index_path, index).await.map_err(Error::from)?;
        Ok(())
    }

    async fn delete_artifacts(&self) {
        let state = self.state.lock().await;
        match state.meta.kind() {
            StorageKind::LocalDisk => {
                if let Err(error) = tokio::fs::remove_file(state.meta.data_path()).await {
                    if error.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            path = %self.path,
                            error = %error,
                            "removing local data file failed"
                        );
                    }
                }
            }
            StorageKind::DistributedFs => {
                let Some(store) = &self.store else { return };
                for path in [
                    state.meta.data_path().to_string(),
                    state.meta.index_path(),
                    state.meta.success_path(),
                ] {
                    let store_path = StorePath::from(path.as_str());
                    if let Err(error) = sink::dfs_delete(store.as_ref(), &store_path).await {
                        tracing::warn!(
                            path = %path,
                            error = %error,
                            "removing store object failed"
                        );
                    }
                }
            }
        }
    }
}

impl DeviceObserver for PartitionWriter {
    fn notify_error(&self, mount_point: &str, status: DiskStatus) {
        if !self.notifier.has_error() {
            self.notifier.set_error(Error::DeviceError {
                mount: mount_point.to_string(),
                status,
            });
        }
        self.device_monitor.unregister(&self.path);
    }
}

/// Peek the 16-byte record header and read the producer map id from its
/// first 4 bytes (host byte order).
fn read_header_map_id(data: &Bytes) -> Result<u32> {
    if data.len() < 16 {
        return Err(Error::Io(format!(
            "record shorter than the 16-byte header: {} bytes",
            data.len()
        )));
    }
    let mut id = [0u8; 4];
    id.copy_from_slice(&data[0..4]);
    Ok(u32::from_ne_bytes(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_id_host_order() {
        let mut record = vec![0u8; 32];
        record[0..4].copy_from_slice(&7u32.to_ne_bytes());
        let id = read_header_map_id(&Bytes::from(record)).unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn test_header_map_id_rejects_short_record() {
        let record = Bytes::from_static(b"short");
        assert!(read_header_map_id(&record).is_err());
    }
}
