//! Partition Writer Integration Tests (local disk)
//!
//! End-to-end coverage of the write path against real temp-dir files:
//! threshold flushing, chunk-offset accounting, close quiescence, poisoning
//! via device errors, destroy teardown, and buffer-pool conservation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use shufflehouse_core::{DiskKind, DiskStatus};
use shufflehouse_storage::error::Error;
use shufflehouse_storage::writer::PartitionWriter;
use shufflehouse_storage::{FlushConfig, StorageManager};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn manager_with(config: FlushConfig, dir: &tempfile::TempDir) -> StorageManager {
    let mount = dir.path().to_string_lossy().to_string();
    StorageManager::new_local(vec![(mount, DiskKind::Ssd)], config)
}

/// Announce-then-write, the way the transport layer drives a writer.
async fn write(writer: &Arc<PartitionWriter>, data: impl Into<Bytes>) {
    writer.increment_pending_writes();
    writer.write(data.into()).await.unwrap();
}

fn record_with_map_id(map_id: u32, len: usize) -> Bytes {
    assert!(len >= 16);
    let mut record = vec![0u8; len];
    record[0..4].copy_from_slice(&map_id.to_ne_bytes());
    Bytes::from(record)
}

#[tokio::test]
async fn test_single_small_write_clean_close() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 1024,
        chunk_size: 4096,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let writer = manager.create_writer("app1-1", "0-0-p", None).await.unwrap();

    write(&writer, vec![1u8; 100]).await;
    let bytes_flushed = writer.close().await.unwrap();

    assert_eq!(bytes_flushed, 100);
    assert_eq!(writer.chunk_offsets().await, vec![100]);
    let file_len = std::fs::metadata(writer.data_path()).unwrap().len();
    assert_eq!(file_len, 100);
}

#[tokio::test]
async fn test_crossing_threshold_triggers_flush() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 1024,
        chunk_size: 600,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let writer = manager.create_writer("app1-1", "1-0-p", None).await.unwrap();

    write(&writer, vec![b'x'; 600]).await;
    write(&writer, vec![b'y'; 600]).await;
    let bytes_flushed = writer.close().await.unwrap();

    assert_eq!(bytes_flushed, 1200);
    assert_eq!(writer.chunk_offsets().await, vec![600, 1200]);
    let contents = std::fs::read(writer.data_path()).unwrap();
    assert_eq!(contents.len(), 1200);
    assert!(contents[..600].iter().all(|b| *b == b'x'));
    assert!(contents[600..].iter().all(|b| *b == b'y'));
}

#[tokio::test]
async fn test_large_chunk_size_coalesces_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 1024,
        chunk_size: 4096,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let writer = manager.create_writer("app1-1", "1-1-p", None).await.unwrap();

    write(&writer, vec![b'x'; 600]).await;
    write(&writer, vec![b'y'; 600]).await;
    let bytes_flushed = writer.close().await.unwrap();

    assert_eq!(bytes_flushed, 1200);
    // Only the forced end-of-file offset: nothing crossed 4096.
    assert_eq!(writer.chunk_offsets().await, vec![1200]);
}

#[tokio::test]
async fn test_chunk_boundaries_across_many_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 1000,
        chunk_size: 2500,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let writer = manager.create_writer("app1-1", "2-0-p", None).await.unwrap();

    for _ in 0..4 {
        write(&writer, vec![7u8; 1000]).await;
    }
    let bytes_flushed = writer.close().await.unwrap();

    assert_eq!(bytes_flushed, 4000);
    // Boundary crossed at 3000 (>= 2500), then close forces 4000.
    assert_eq!(writer.chunk_offsets().await, vec![3000, 4000]);
    assert_eq!(
        std::fs::metadata(writer.data_path()).unwrap().len(),
        4000
    );

    // Offsets are non-decreasing and gap-bounded by chunk + max write size.
    let offsets = writer.chunk_offsets().await;
    for pair in offsets.windows(2) {
        assert!(pair[1] >= pair[0]);
        assert!(pair[1] - pair[0] <= 2500 + 1000);
    }
}

#[tokio::test]
async fn test_range_read_filter_collects_map_ids() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 1024,
        range_read_filter: true,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let writer = manager.create_writer("app1-1", "3-0-p", None).await.unwrap();

    for map_id in [7, 7, 9] {
        write(&writer, record_with_map_id(map_id, 64)).await;
    }
    writer.close().await.unwrap();

    let bitmap = writer.map_id_bitmap().await.unwrap();
    assert_eq!(bitmap.len(), 2);
    assert!(bitmap.contains(7));
    assert!(bitmap.contains(9));
}

#[tokio::test]
async fn test_device_error_poisons_writer() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().to_string_lossy().to_string();
    let config = FlushConfig {
        flush_buffer_size: 256,
        ..FlushConfig::default()
    };
    let manager = StorageManager::new_local(vec![(mount.clone(), DiskKind::Hdd)], config);
    let writer = manager.create_writer("app1-1", "4-0-p", None).await.unwrap();

    // First flush lands.
    write(&writer, vec![1u8; 200]).await;
    writer.flush_on_memory_pressure().await.unwrap();

    manager
        .device_monitor()
        .report_device_error(&mount, DiskStatus::ReadOrWriteFailed);

    // Poisoned writes are dropped silently.
    writer.increment_pending_writes();
    writer.write(Bytes::from(vec![2u8; 200])).await.unwrap();

    let error = writer.close().await.unwrap_err();
    match &error {
        Error::DeviceError { mount: m, status } => {
            assert_eq!(m, &mount);
            assert_eq!(*status, DiskStatus::ReadOrWriteFailed);
        }
        other => panic!("expected device error, got {other:?}"),
    }
    assert!(error.to_string().contains(&mount));
    // The error callback also unregistered the writer.
    assert_eq!(manager.device_monitor().observer_count(), 0);
}

#[tokio::test]
async fn test_healthy_and_high_usage_reports_are_noops() {
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().to_string_lossy().to_string();
    let manager =
        StorageManager::new_local(vec![(mount.clone(), DiskKind::Hdd)], FlushConfig::default());
    let writer = manager.create_writer("app1-1", "4-1-p", None).await.unwrap();

    manager.device_monitor().report_healthy(&mount);
    manager.device_monitor().report_high_disk_usage(&mount);

    write(&writer, vec![5u8; 32]).await;
    assert_eq!(writer.close().await.unwrap(), 32);
}

#[tokio::test]
async fn test_write_and_close_after_close_fail() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(FlushConfig::default(), &dir);
    let writer = manager.create_writer("app1-1", "5-0-p", None).await.unwrap();

    write(&writer, vec![1u8; 10]).await;
    writer.close().await.unwrap();

    writer.increment_pending_writes();
    let write_err = writer.write(Bytes::from_static(b"late")).await.unwrap_err();
    assert!(matches!(write_err, Error::AlreadyClosed(_)));
    writer.decrement_pending_writes();

    let close_err = writer.close().await.unwrap_err();
    assert!(matches!(close_err, Error::AlreadyClosed(_)));
}

#[tokio::test]
async fn test_buffer_pool_conserved_after_close_and_destroy() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 128,
        buffers_per_flusher: 4,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let flusher = manager.local_flushers()[0].clone();
    let initial = flusher.pool().available();

    let closed = manager.create_writer("app1-1", "6-0-p", None).await.unwrap();
    for _ in 0..5 {
        write(&closed, vec![3u8; 100]).await;
    }
    closed.close().await.unwrap();

    let destroyed = manager.create_writer("app1-1", "6-1-p", None).await.unwrap();
    write(&destroyed, vec![4u8; 100]).await;
    destroyed.destroy().await;

    assert_eq!(flusher.pool().available(), initial);
    // All accepted bytes either flushed or torn down: gauge back to zero.
    assert_eq!(manager.memory_tracker().disk_buffer_bytes(), 0);
}

#[tokio::test]
async fn test_destroy_removes_artifacts_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(FlushConfig::default(), &dir);
    let writer = manager.create_writer("app1-1", "7-0-p", None).await.unwrap();

    write(&writer, vec![9u8; 64]).await;
    writer.flush_on_memory_pressure().await.unwrap();
    assert!(std::path::Path::new(writer.data_path()).exists());

    writer.destroy().await;
    assert!(!std::path::Path::new(writer.data_path()).exists());
    assert!(matches!(writer.error(), Some(Error::Destroyed)));

    // Second destroy is a no-op beyond best-effort deletes.
    writer.destroy().await;
    assert!(!std::path::Path::new(writer.data_path()).exists());
}

#[tokio::test]
async fn test_destroy_runs_hook_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(FlushConfig::default(), &dir);
    let writer = manager.create_writer("app1-1", "7-1-p", None).await.unwrap();

    let unlinked = Arc::new(AtomicUsize::new(0));
    {
        let unlinked = unlinked.clone();
        writer
            .register_destroy_hook(move || {
                unlinked.fetch_add(1, Ordering::SeqCst);
            })
            .await;
    }

    writer.destroy().await;
    writer.destroy().await;
    assert_eq!(unlinked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_writers_share_flusher_keep_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 256,
        chunk_size: 1024,
        ..FlushConfig::default()
    };
    let manager = Arc::new(manager_with(config, &dir));

    let writer_a = manager.create_writer("app1-1", "8-0-p", None).await.unwrap();
    let writer_b = manager.create_writer("app1-1", "8-1-p", None).await.unwrap();

    let task_a = {
        let writer = writer_a.clone();
        tokio::spawn(async move {
            for i in 0..20u8 {
                writer.increment_pending_writes();
                writer.write(Bytes::from(vec![i; 100])).await.unwrap();
            }
        })
    };
    let task_b = {
        let writer = writer_b.clone();
        tokio::spawn(async move {
            for i in 0..20u8 {
                writer.increment_pending_writes();
                writer.write(Bytes::from(vec![100 + i; 100])).await.unwrap();
            }
        })
    };
    task_a.await.unwrap();
    task_b.await.unwrap();

    assert_eq!(writer_a.close().await.unwrap(), 2000);
    assert_eq!(writer_b.close().await.unwrap(), 2000);

    // Bytes appear in the order the writes returned, per writer.
    let contents_a = std::fs::read(writer_a.data_path()).unwrap();
    let contents_b = std::fs::read(writer_b.data_path()).unwrap();
    for i in 0..20usize {
        assert!(contents_a[i * 100..(i + 1) * 100]
            .iter()
            .all(|b| *b == i as u8));
        assert!(contents_b[i * 100..(i + 1) * 100]
            .iter()
            .all(|b| *b == 100 + i as u8));
    }
}

#[tokio::test]
async fn test_flush_on_memory_pressure_drains_partial_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 1 << 20,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);
    let writer = manager.create_writer("app1-1", "9-0-p", None).await.unwrap();

    write(&writer, vec![1u8; 300]).await;
    assert_eq!(manager.memory_tracker().disk_buffer_bytes(), 300);

    writer.flush_on_memory_pressure().await.unwrap();

    // The flusher releases the gauge once the task lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if manager.memory_tracker().disk_buffer_bytes() == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "gauge never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(writer.close().await.unwrap(), 300);
}

#[tokio::test]
async fn test_pool_exhaustion_poisons_instead_of_allocating() {
    let dir = tempfile::tempdir().unwrap();
    let config = FlushConfig {
        flush_buffer_size: 64,
        buffers_per_flusher: 1,
        buffer_timeout_ms: 50,
        ..FlushConfig::default()
    };
    let manager = manager_with(config, &dir);

    // Drain the pool before the writer is created.
    let flusher = manager.local_flushers()[0].clone();
    let held = flusher.take_buffer().await.unwrap();

    let writer = manager.create_writer("app1-1", "10-0-p", None).await.unwrap();
    assert!(matches!(writer.error(), Some(Error::BufferExhausted(_))));

    // Poisoned write drops silently; close surfaces the exhaustion.
    writer.increment_pending_writes();
    writer.write(Bytes::from(vec![0u8; 32])).await.unwrap();
    let error = writer.close().await.unwrap_err();
    assert!(matches!(error, Error::BufferExhausted(_)));

    flusher.return_buffer(held);
}
