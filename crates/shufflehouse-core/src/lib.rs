pub mod chunk_index;
pub mod error;
pub mod file_meta;
pub mod partition;
pub mod storage;

pub use error::{Error, Result};
pub use file_meta::{FileMeta, StorageKind};
pub use partition::{PartitionSplitMode, PartitionType};
pub use storage::{DiskKind, DiskStatus, StorageInfo};
