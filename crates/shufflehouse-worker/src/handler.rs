//! Worker Handler
//!
//! The adapters the RPC endpoints call into: slot reservation, commit,
//! destroy, and the two introspection calls. Serialization and transport
//! live a layer above; everything here speaks plain request/response
//! structs.

use std::collections::HashMap;
use std::sync::Arc;

use shufflehouse_storage::error::Result;
use shufflehouse_storage::{PartitionWriter, StorageManager};

use crate::commit::{
    CommitCoordinator, CommitFilesRequest, CommitFilesResponse, DestroyRequest, DestroyResponse,
};
use crate::config::WorkerConfig;
use crate::registry::ShuffleRegistry;

/// One partition slot to reserve: the location id this worker writes, plus
/// (for a replicated distributed file) the peer replica's location id.
#[derive(Debug, Clone)]
pub struct PartitionSlot {
    pub location_id: String,
    pub peer_location_id: Option<String>,
}

impl PartitionSlot {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            peer_location_id: None,
        }
    }

    pub fn with_peer(mut self, peer_location_id: impl Into<String>) -> Self {
        self.peer_location_id = Some(peer_location_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReserveSlotsRequest {
    pub shuffle_key: String,
    pub primary_slots: Vec<PartitionSlot>,
    pub secondary_slots: Vec<PartitionSlot>,
}

/// Point-in-time snapshot for the worker-info call.
#[derive(Debug)]
pub struct WorkerInfo {
    pub shuffle_count: usize,
    pub writer_counts: HashMap<String, usize>,
    pub disk_buffer_bytes: u64,
    pub flusher_pools: Vec<String>,
}

pub struct WorkerHandler {
    storage: Arc<StorageManager>,
    registry: Arc<ShuffleRegistry>,
    coordinator: CommitCoordinator,
}

impl WorkerHandler {
    pub fn new(storage: Arc<StorageManager>, config: &WorkerConfig) -> Self {
        let registry = Arc::new(ShuffleRegistry::new());
        let coordinator = CommitCoordinator::new(registry.clone(), config);
        Self {
            storage,
            registry,
            coordinator,
        }
    }

    /// Create and register the writers for a batch of reserved slots.
    ///
    /// All-or-nothing: if any writer cannot be created, everything
    /// allocated so far (primaries and secondaries alike) is destroyed
    /// before the error is returned, so a failed reservation leaves no
    /// writers and no artefacts behind.
    pub async fn reserve_slots(&self, request: ReserveSlotsRequest) -> Result<()> {
        let shuffle_key = request.shuffle_key.as_str();
        let mut created: Vec<(String, Arc<PartitionWriter>)> = Vec::new();

        let slots = request
            .primary_slots
            .iter()
            .chain(request.secondary_slots.iter());
        for slot in slots {
            match self
                .storage
                .create_writer(
                    shuffle_key,
                    &slot.location_id,
                    slot.peer_location_id.as_deref(),
                )
                .await
            {
                Ok(writer) => created.push((slot.location_id.clone(), writer)),
                Err(error) => {
                    tracing::error!(
                        shuffle = %shuffle_key,
                        location = %slot.location_id,
                        error = %error,
                        "slot reservation failed, destroying partial allocation"
                    );
                    for (_, writer) in &created {
                        writer.destroy().await;
                    }
                    return Err(error);
                }
            }
        }

        self.registry.register_shuffle(shuffle_key);
        for (location_id, writer) in created {
            self.registry
                .register_writer(shuffle_key, &location_id, writer)
                .await;
        }
        Ok(())
    }

    pub async fn commit_files(&self, request: CommitFilesRequest) -> CommitFilesResponse {
        self.coordinator.commit_files(request).await
    }

    pub async fn destroy(&self, request: DestroyRequest) -> DestroyResponse {
        self.coordinator.destroy(request).await
    }

    pub fn worker_infos(&self) -> WorkerInfo {
        let writer_counts = self
            .registry
            .shuffle_keys()
            .into_iter()
            .map(|key| {
                let count = self.registry.writer_count(&key);
                (key, count)
            })
            .collect();
        WorkerInfo {
            shuffle_count: self.registry.shuffle_count(),
            writer_counts,
            disk_buffer_bytes: self.storage.memory_tracker().disk_buffer_bytes(),
            flusher_pools: self
                .storage
                .local_flushers()
                .iter()
                .map(|flusher| {
                    format!(
                        "{}: {}",
                        flusher.mount_point().unwrap_or("<distributed-fs>"),
                        flusher.queue_info()
                    )
                })
                .collect(),
        }
    }

    /// Textual snapshot of every live writer, one line per writer.
    pub fn thread_dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for key in self.registry.shuffle_keys() {
            for (id, writer) in self.registry.writers(&key) {
                lines.push(format!(
                    "{}/{} path={} closed={} error={:?}",
                    key,
                    id,
                    writer.data_path(),
                    writer.is_closed(),
                    writer.error(),
                ));
            }
        }
        lines
    }

    pub fn registry(&self) -> &Arc<ShuffleRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }
}
