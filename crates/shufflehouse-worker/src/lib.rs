pub mod commit;
pub mod config;
pub mod handler;
pub mod registry;

pub use commit::{
    CommitCoordinator, CommitFilesRequest, CommitFilesResponse, CommitStatus, DestroyRequest,
    DestroyResponse,
};
pub use config::WorkerConfig;
pub use handler::{PartitionSlot, ReserveSlotsRequest, WorkerHandler, WorkerInfo};
pub use registry::ShuffleRegistry;
