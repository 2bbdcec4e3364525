//! Storage Manager
//!
//! Wires the write path together for one worker process: one flusher per
//! configured local data dir (or one for the distributed store), the shared
//! device monitor, and the outstanding-byte tracker. Slot reservation asks
//! it for writers; everything else only sees `PartitionWriter`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use object_store::ObjectStore;

use shufflehouse_core::{DiskKind, FileMeta, StorageKind};

use crate::config::FlushConfig;
use crate::device::DeviceMonitor;
use crate::error::{Error, Result};
use crate::flusher::Flusher;
use crate::memory::MemoryTracker;
use crate::writer::PartitionWriter;

struct DfsBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    flusher: Arc<Flusher>,
}

pub struct StorageManager {
    config: FlushConfig,
    local_flushers: Vec<Arc<Flusher>>,
    dfs: Option<DfsBackend>,
    device_monitor: Arc<DeviceMonitor>,
    tracker: Arc<MemoryTracker>,
}

impl StorageManager {
    /// Local-disk deployment: one flusher per data dir.
    pub fn new_local(data_dirs: Vec<(String, DiskKind)>, config: FlushConfig) -> Self {
        let tracker = Arc::new(MemoryTracker::new());
        let local_flushers = data_dirs
            .into_iter()
            .map(|(mount_point, disk_kind)| {
                Flusher::new_local(mount_point, disk_kind, &config, tracker.clone())
            })
            .collect();
        Self {
            config,
            local_flushers,
            dfs: None,
            device_monitor: Arc::new(DeviceMonitor::new()),
            tracker,
        }
    }

    /// Distributed-store deployment: partition files stream to
    /// `<prefix>/<shuffle>/<location>` on the given store.
    pub fn new_dfs(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        config: FlushConfig,
    ) -> Self {
        let tracker = Arc::new(MemoryTracker::new());
        let flusher = Flusher::new_dfs(&config, tracker.clone());
        Self {
            config,
            local_flushers: Vec::new(),
            dfs: Some(DfsBackend {
                store,
                prefix: prefix.into(),
                flusher,
            }),
            device_monitor: Arc::new(DeviceMonitor::new()),
            tracker,
        }
    }

    /// Build the writer for one partition location. `peer_location_id` is
    /// the replica written by the other worker, used to detect the
    /// replication race at close (distributed store only).
    pub async fn create_writer(
        &self,
        shuffle_key: &str,
        location_id: &str,
        peer_location_id: Option<&str>,
    ) -> Result<Arc<PartitionWriter>> {
        if let Some(dfs) = &self.dfs {
            let data_path = format!("{}/{}/{}", dfs.prefix, shuffle_key, location_id);
            let mut meta = FileMeta::new(StorageKind::DistributedFs, data_path);
            if let Some(peer) = peer_location_id {
                meta = meta.with_peer_success_path(format!(
                    "{}/{}/{}.success",
                    dfs.prefix, shuffle_key, peer
                ));
            }
            if self.config.range_read_filter {
                meta = meta.with_map_id_tracking();
            }
            PartitionWriter::create(
                meta,
                dfs.flusher.clone(),
                Some(dfs.store.clone()),
                &self.config,
                self.device_monitor.clone(),
            )
            .await
        } else {
            let flusher = self.pick_local_flusher(shuffle_key, location_id)?;
            let mount_point = flusher.mount_point().unwrap_or_default().to_string();
            let data_path = format!("{}/{}/{}", mount_point, shuffle_key, location_id);
            let mut meta = FileMeta::new(StorageKind::LocalDisk, data_path);
            if self.config.range_read_filter {
                meta = meta.with_map_id_tracking();
            }
            PartitionWriter::create(
                meta,
                flusher,
                None,
                &self.config,
                self.device_monitor.clone(),
            )
            .await
        }
    }

    /// Best-effort removal of a shuffle's local directories.
    pub async fn remove_shuffle_dirs(&self, shuffle_key: &str) {
        for flusher in &self.local_flushers {
            let Some(mount_point) = flusher.mount_point() else {
                continue;
            };
            let dir = format!("{}/{}", mount_point, shuffle_key);
            if let Err(error) = tokio::fs::remove_dir_all(&dir).await {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir, error = %error, "removing shuffle dir failed");
                }
            }
        }
    }

    pub fn device_monitor(&self) -> &Arc<DeviceMonitor> {
        &self.device_monitor
    }

    pub fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }

    pub fn local_flushers(&self) -> &[Arc<Flusher>] {
        &self.local_flushers
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    fn pick_local_flusher(&self, shuffle_key: &str, location_id: &str) -> Result<Arc<Flusher>> {
        if self.local_flushers.is_empty() {
            return Err(Error::Io(
                "no local data dirs and no distributed store configured".to_string(),
            ));
        }
        let mut hasher = DefaultHasher::new();
        shuffle_key.hash(&mut hasher);
        location_id.hash(&mut hasher);
        let index = (hasher.finish() % self.local_flushers.len() as u64) as usize;
        Ok(self.local_flushers[index].clone())
    }
}
