//! Storage Descriptors
//!
//! Small value types shared between the write path and the commit surface:
//! disk health states reported by the device monitor, disk media kinds, and
//! the `StorageInfo` descriptor published for each committed partition.

use serde::{Deserialize, Serialize};

use crate::file_meta::StorageKind;

/// Health of a local mount as reported by disk monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskStatus {
    Healthy,
    ReadOrWriteFailed,
    HighDiskUsage,
}

impl std::fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskStatus::Healthy => write!(f, "healthy"),
            DiskStatus::ReadOrWriteFailed => write!(f, "read-or-write-failed"),
            DiskStatus::HighDiskUsage => write!(f, "high-disk-usage"),
        }
    }
}

/// Media kind of a local mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskKind {
    Hdd,
    Ssd,
}

/// Where a committed partition can be fetched from.
///
/// Local files carry the mount point and media kind of the disk they landed
/// on; distributed files carry their full store path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub kind: SerializableStorageKind,
    pub disk_kind: Option<DiskKind>,
    pub location: String,
    pub available: bool,
}

/// `StorageKind` mirror with serde derives for the commit reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializableStorageKind {
    LocalDisk,
    DistributedFs,
}

impl From<StorageKind> for SerializableStorageKind {
    fn from(kind: StorageKind) -> Self {
        match kind {
            StorageKind::LocalDisk => SerializableStorageKind::LocalDisk,
            StorageKind::DistributedFs => SerializableStorageKind::DistributedFs,
        }
    }
}

impl StorageInfo {
    pub fn local_disk(disk_kind: DiskKind, mount_point: impl Into<String>) -> Self {
        Self {
            kind: SerializableStorageKind::LocalDisk,
            disk_kind: Some(disk_kind),
            location: mount_point.into(),
            available: true,
        }
    }

    pub fn distributed_fs(path: impl Into<String>) -> Self {
        Self {
            kind: SerializableStorageKind::DistributedFs,
            disk_kind: None,
            location: path.into(),
            available: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_disk_descriptor() {
        let info = StorageInfo::local_disk(DiskKind::Ssd, "/mnt/disk1");
        assert_eq!(info.kind, SerializableStorageKind::LocalDisk);
        assert_eq!(info.disk_kind, Some(DiskKind::Ssd));
        assert_eq!(info.location, "/mnt/disk1");
        assert!(info.available);
    }

    #[test]
    fn test_distributed_fs_descriptor() {
        let info = StorageInfo::distributed_fs("shuffles/app/3-0");
        assert_eq!(info.kind, SerializableStorageKind::DistributedFs);
        assert_eq!(info.disk_kind, None);
        assert_eq!(info.location, "shuffles/app/3-0");
    }

    #[test]
    fn test_disk_status_display() {
        assert_eq!(DiskStatus::ReadOrWriteFailed.to_string(), "read-or-write-failed");
        assert_eq!(DiskStatus::Healthy.to_string(), "healthy");
    }
}
