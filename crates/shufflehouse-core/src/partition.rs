//! Partition Attributes
//!
//! Enums carried as writer attributes and echoed back to the layer that
//! decides when a partition must split to a new file.

use serde::{Deserialize, Serialize};

/// How a full partition is split to a new file.
///
/// `Soft` lets the current writer finish its in-flight batch before the
/// split; `Hard` splits immediately at the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionSplitMode {
    #[default]
    Soft,
    Hard,
}

/// Which side of the exchange this partition file belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionType {
    #[default]
    Reduce,
    Map,
}
