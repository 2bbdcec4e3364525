//! Commit Coordination
//!
//! A commit finalizes every partition file of a shuffle held by this
//! worker: the coordinator fans `close()` out across the primary and
//! secondary writers in parallel, classifies each outcome, and reports a
//! single reply under one wall-clock deadline.
//!
//! Classification per location id:
//! - writer missing → logged and skipped (another commit already took it)
//! - close error → failed
//! - zero bytes → dropped silently (nothing to fetch)
//! - bytes but no storage info → dropped (a peer replica published first)
//! - otherwise → committed, carrying the storage descriptor, the optional
//!   map-id bitmap, and (when large enough) the size for cluster-wide
//!   partition-size estimation
//!
//! When the deadline expires the aggregate is cancelled: closes already
//! inside sink I/O are not interrupted, they finish on their own and their
//! results are ignored; their ids are reported as failed. The coordinator
//! always replies, even on a cancelled aggregate, so callers can act on the
//! explicit failed lists instead of racing their own timers.
//!
//! Destroy is symmetric, minus the deadline: destroy never raises and
//! never blocks on drain, so the fan-out is a plain parallel sweep. Ids
//! with no live writer are the "failed destroys".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use shufflehouse_core::StorageInfo;
use shufflehouse_storage::PartitionWriter;

use crate::config::WorkerConfig;
use crate::registry::ShuffleRegistry;

#[derive(Debug, Clone)]
pub struct CommitFilesRequest {
    pub shuffle_key: String,
    pub primary_ids: Vec<String>,
    pub secondary_ids: Vec<String>,
    pub mapper_attempts: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Success,
    PartialSuccess,
    ShuffleNotRegistered,
}

#[derive(Debug)]
pub struct CommitFilesResponse {
    pub status: CommitStatus,
    pub committed_primary_ids: Vec<String>,
    pub committed_secondary_ids: Vec<String>,
    pub failed_primary_ids: Vec<String>,
    pub failed_secondary_ids: Vec<String>,
    pub primary_storage_infos: HashMap<String, StorageInfo>,
    pub secondary_storage_infos: HashMap<String, StorageInfo>,
    /// Serialized map-id bitmaps, keyed by location id, for writers that
    /// tracked range-read filtering.
    pub map_id_bitmaps: HashMap<String, Vec<u8>>,
    /// Committed sizes at least `min_partition_size_to_estimate`, for the
    /// master's partition-size estimation.
    pub partition_sizes: Vec<u64>,
    pub total_bytes: u64,
}

impl CommitFilesResponse {
    fn not_registered() -> Self {
        Self {
            status: CommitStatus::ShuffleNotRegistered,
            committed_primary_ids: Vec::new(),
            committed_secondary_ids: Vec::new(),
            failed_primary_ids: Vec::new(),
            failed_secondary_ids: Vec::new(),
            primary_storage_infos: HashMap::new(),
            secondary_storage_infos: HashMap::new(),
            map_id_bitmaps: HashMap::new(),
            partition_sizes: Vec::new(),
            total_bytes: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DestroyRequest {
    pub shuffle_key: String,
    pub primary_ids: Vec<String>,
    pub secondary_ids: Vec<String>,
}

#[derive(Debug)]
pub struct DestroyResponse {
    /// Location ids that had no live writer to destroy.
    pub failed_primary_ids: Vec<String>,
    pub failed_secondary_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Primary,
    Secondary,
}

enum CloseOutcome {
    Committed {
        bytes: u64,
        info: StorageInfo,
        bitmap: Option<Vec<u8>>,
    },
    Dropped,
    Failed,
}

pub struct CommitCoordinator {
    registry: Arc<ShuffleRegistry>,
    commit_timeout: Duration,
    min_partition_size_to_estimate: u64,
}

impl CommitCoordinator {
    pub fn new(registry: Arc<ShuffleRegistry>, config: &WorkerConfig) -> Self {
        Self {
            registry,
            commit_timeout: Duration::from_secs(config.shuffle_commit_timeout_secs),
            min_partition_size_to_estimate: config.min_partition_size_to_estimate,
        }
    }

    pub async fn commit_files(&self, request: CommitFilesRequest) -> CommitFilesResponse {
        let shuffle_key = request.shuffle_key.as_str();
        if !self.registry.is_registered(shuffle_key) {
            tracing::warn!(shuffle = %shuffle_key, "commit for unknown shuffle");
            return CommitFilesResponse::not_registered();
        }

        self.registry
            .record_mapper_attempts(shuffle_key, request.mapper_attempts.clone());

        let mut handles = Vec::new();
        let sides = [
            (Side::Primary, &request.primary_ids),
            (Side::Secondary, &request.secondary_ids),
        ];
        for (side, ids) in sides {
            for id in ids {
                let Some(writer) = self.registry.get_writer(shuffle_key, id) else {
                    tracing::info!(
                        shuffle = %shuffle_key,
                        location = %id,
                        "no writer for location, skipping commit"
                    );
                    continue;
                };
                let id = id.clone();
                handles.push((
                    side,
                    id.clone(),
                    tokio::spawn(async move { close_and_classify(writer, &id).await }),
                ));
            }
        }

        let mut response = CommitFilesResponse {
            status: CommitStatus::Success,
            ..CommitFilesResponse::not_registered()
        };

        let deadline = Instant::now() + self.commit_timeout;
        let mut cancelled = false;
        for (side, id, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) => {
                    tracing::error!(
                        shuffle = %shuffle_key,
                        location = %id,
                        error = %join_error,
                        "close task aborted"
                    );
                    CloseOutcome::Failed
                }
                Err(_) => {
                    // Deadline expired. The close keeps running on its own;
                    // its eventual result is ignored.
                    cancelled = true;
                    CloseOutcome::Failed
                }
            };

            match outcome {
                CloseOutcome::Committed {
                    bytes,
                    info,
                    bitmap,
                } => {
                    response.total_bytes += bytes;
                    if bytes >= self.min_partition_size_to_estimate {
                        response.partition_sizes.push(bytes);
                    }
                    if let Some(bitmap) = bitmap {
                        response.map_id_bitmaps.insert(id.clone(), bitmap);
                    }
                    match side {
                        Side::Primary => {
                            response.primary_storage_infos.insert(id.clone(), info);
                            response.committed_primary_ids.push(id);
                        }
                        Side::Secondary => {
                            response.secondary_storage_infos.insert(id.clone(), info);
                            response.committed_secondary_ids.push(id);
                        }
                    }
                }
                CloseOutcome::Dropped => {}
                CloseOutcome::Failed => match side {
                    Side::Primary => response.failed_primary_ids.push(id),
                    Side::Secondary => response.failed_secondary_ids.push(id),
                },
            }
        }

        if cancelled {
            tracing::warn!(
                shuffle = %shuffle_key,
                timeout = ?self.commit_timeout,
                "commit aggregate cancelled by deadline; unfinished closes reported as failed"
            );
        }

        let mut processed: Vec<String> = request.primary_ids.clone();
        processed.extend(request.secondary_ids.iter().cloned());
        self.registry.release_slots(shuffle_key, &processed);

        if !response.failed_primary_ids.is_empty() || !response.failed_secondary_ids.is_empty() {
            response.status = CommitStatus::PartialSuccess;
        }
        response
    }

    pub async fn destroy(&self, request: DestroyRequest) -> DestroyResponse {
        let shuffle_key = request.shuffle_key.as_str();

        let mut response = DestroyResponse {
            failed_primary_ids: Vec::new(),
            failed_secondary_ids: Vec::new(),
        };

        let mut doomed = Vec::new();
        let sides = [
            (Side::Primary, &request.primary_ids),
            (Side::Secondary, &request.secondary_ids),
        ];
        for (side, ids) in sides {
            for id in ids {
                match self.registry.get_writer(shuffle_key, id) {
                    Some(writer) => doomed.push(writer),
                    None => {
                        tracing::info!(
                            shuffle = %shuffle_key,
                            location = %id,
                            "no writer for location, reporting failed destroy"
                        );
                        match side {
                            Side::Primary => response.failed_primary_ids.push(id.clone()),
                            Side::Secondary => response.failed_secondary_ids.push(id.clone()),
                        }
                    }
                }
            }
        }

        join_all(doomed.iter().map(|writer| writer.destroy())).await;

        let mut processed: Vec<String> = request.primary_ids.clone();
        processed.extend(request.secondary_ids.iter().cloned());
        self.registry.release_slots(shuffle_key, &processed);

        response
    }
}

async fn close_and_classify(writer: Arc<PartitionWriter>, id: &str) -> CloseOutcome {
    match writer.close().await {
        Err(error) => {
            tracing::error!(location = %id, error = %error, "close failed during commit");
            CloseOutcome::Failed
        }
        Ok(0) => {
            tracing::debug!(location = %id, "empty partition dropped from commit");
            CloseOutcome::Dropped
        }
        Ok(bytes) => match writer.storage_info().await {
            None => {
                tracing::debug!(location = %id, "peer replica published first, dropped");
                CloseOutcome::Dropped
            }
            Some(info) => {
                let bitmap = writer.map_id_bitmap().await.and_then(|bitmap| {
                    let mut serialized = Vec::new();
                    match bitmap.serialize_into(&mut serialized) {
                        Ok(()) => Some(serialized),
                        Err(error) => {
                            tracing::warn!(
                                location = %id,
                                error = %error,
                                "serializing map-id bitmap failed"
                            );
                            None
                        }
                    }
                });
                CloseOutcome::Committed {
                    bytes,
                    info,
                    bitmap,
                }
            }
        },
    }
}
