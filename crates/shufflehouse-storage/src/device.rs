//! Device Monitoring Hook
//!
//! Writers register themselves as observers of the disk their file lands
//! on. Disk monitoring calls back at any time, possibly concurrently with
//! an in-progress write or close, so the observer methods are synchronous
//! and must not block. Error callbacks poison the writer; health and
//! high-usage callbacks are no-ops at this layer.
//!
//! The monitor holds weak handles only: registration is bare membership and
//! never extends a writer's lifetime.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};

use shufflehouse_core::DiskStatus;

pub trait DeviceObserver: Send + Sync {
    fn notify_error(&self, mount_point: &str, status: DiskStatus);

    fn notify_healthy(&self, _mount_point: &str) {}

    fn notify_high_disk_usage(&self, _mount_point: &str) {}
}

struct ObserverEntry {
    mount_point: String,
    observer: Weak<dyn DeviceObserver>,
}

#[derive(Default)]
pub struct DeviceMonitor {
    observers: Mutex<HashMap<String, ObserverEntry>>,
}

impl DeviceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: impl Into<String>,
        mount_point: impl Into<String>,
        observer: Weak<dyn DeviceObserver>,
    ) {
        self.lock().insert(
            id.into(),
            ObserverEntry {
                mount_point: mount_point.into(),
                observer,
            },
        );
    }

    pub fn unregister(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    pub fn report_device_error(&self, mount_point: &str, status: DiskStatus) {
        for observer in self.collect(mount_point) {
            observer.notify_error(mount_point, status);
        }
    }

    pub fn report_healthy(&self, mount_point: &str) {
        for observer in self.collect(mount_point) {
            observer.notify_healthy(mount_point);
        }
    }

    pub fn report_high_disk_usage(&self, mount_point: &str) {
        for observer in self.collect(mount_point) {
            observer.notify_high_disk_usage(mount_point);
        }
    }

    /// Upgrade the live observers of one mount with the lock released
    /// before any callback runs: observers typically unregister themselves
    /// from inside the callback. Dead weak handles are pruned on the way.
    fn collect(&self, mount_point: &str) -> Vec<std::sync::Arc<dyn DeviceObserver>> {
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.observer.strong_count() > 0);
        entries
            .values()
            .filter(|entry| entry.mount_point == mount_point)
            .filter_map(|entry| entry.observer.upgrade())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ObserverEntry>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
