//! Shuffle Registry
//!
//! The partition-location index of one worker: every live writer, grouped
//! by shuffle key, plus the mapper-attempt array recorded at first commit.
//!
//! Writers and the registry would form a reference cycle if each writer
//! pointed back at its owning list, so the link runs the other way: when a
//! writer is registered, a one-shot destroy hook is installed that unlinks
//! it through a weak registry handle. The registry itself only ever hands
//! out `Arc` clones; dropping a shuffle entry never tears down a writer
//! that someone else is still closing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use shufflehouse_storage::PartitionWriter;

#[derive(Default)]
struct ShuffleEntry {
    writers: HashMap<String, Arc<PartitionWriter>>,
    mapper_attempts: Option<Vec<i32>>,
}

#[derive(Default)]
pub struct ShuffleRegistry {
    shuffles: Mutex<HashMap<String, ShuffleEntry>>,
}

impl ShuffleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_shuffle(&self, shuffle_key: &str) {
        self.lock().entry(shuffle_key.to_string()).or_default();
    }

    pub fn is_registered(&self, shuffle_key: &str) -> bool {
        self.lock().contains_key(shuffle_key)
    }

    /// Add a writer under its shuffle and install the unlink hook.
    pub async fn register_writer(
        self: &Arc<Self>,
        shuffle_key: &str,
        location_id: &str,
        writer: Arc<PartitionWriter>,
    ) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let hook_key = shuffle_key.to_string();
        let hook_id = location_id.to_string();
        writer
            .register_destroy_hook(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.unlink(&hook_key, &hook_id);
                }
            })
            .await;

        self.lock()
            .entry(shuffle_key.to_string())
            .or_default()
            .writers
            .insert(location_id.to_string(), writer);
    }

    pub fn get_writer(&self, shuffle_key: &str, location_id: &str) -> Option<Arc<PartitionWriter>> {
        self.lock()
            .get(shuffle_key)
            .and_then(|entry| entry.writers.get(location_id).cloned())
    }

    /// Record the mapper-attempt array for a shuffle. First writer wins;
    /// returns whether this call recorded it.
    pub fn record_mapper_attempts(&self, shuffle_key: &str, attempts: Vec<i32>) -> bool {
        let mut shuffles = self.lock();
        let Some(entry) = shuffles.get_mut(shuffle_key) else {
            return false;
        };
        if entry.mapper_attempts.is_some() {
            return false;
        }
        entry.mapper_attempts = Some(attempts);
        true
    }

    pub fn mapper_attempts(&self, shuffle_key: &str) -> Option<Vec<i32>> {
        self.lock()
            .get(shuffle_key)
            .and_then(|entry| entry.mapper_attempts.clone())
    }

    /// Release the slots held by the given location ids.
    pub fn release_slots(&self, shuffle_key: &str, location_ids: &[String]) {
        let mut shuffles = self.lock();
        if let Some(entry) = shuffles.get_mut(shuffle_key) {
            for id in location_ids {
                entry.writers.remove(id);
            }
        }
    }

    /// Drop a shuffle entirely, returning any writers that were still live.
    pub fn remove_shuffle(&self, shuffle_key: &str) -> Vec<Arc<PartitionWriter>> {
        self.lock()
            .remove(shuffle_key)
            .map(|entry| entry.writers.into_values().collect())
            .unwrap_or_default()
    }

    pub fn shuffle_keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn shuffle_count(&self) -> usize {
        self.lock().len()
    }

    pub fn writer_count(&self, shuffle_key: &str) -> usize {
        self.lock()
            .get(shuffle_key)
            .map_or(0, |entry| entry.writers.len())
    }

    /// Snapshot of the live writers of one shuffle.
    pub fn writers(&self, shuffle_key: &str) -> Vec<(String, Arc<PartitionWriter>)> {
        self.lock()
            .get(shuffle_key)
            .map(|entry| {
                entry
                    .writers
                    .iter()
                    .map(|(id, writer)| (id.clone(), writer.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn unlink(&self, shuffle_key: &str, location_id: &str) {
        let mut shuffles = self.lock();
        if let Some(entry) = shuffles.get_mut(shuffle_key) {
            entry.writers.remove(location_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ShuffleEntry>> {
        self.shuffles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
