//! Write-Path Error Types
//!
//! ## Error Categories
//!
//! ### Terminal-state errors
//! - `AlreadyClosed`: write or close attempted on a writer that already
//!   reached a terminal state
//! - `Destroyed`: the writer was torn down; latched so late flushes and
//!   closes observe it
//!
//! ### Resource errors
//! - `Timeout`: a bounded wait (pending-write drain, pending-flush drain,
//!   flush-task enqueue) exceeded its deadline
//! - `BufferExhausted`: the flusher's buffer pool stayed empty past the
//!   borrow deadline
//!
//! ### External failures
//! - `Io`: sink append/close, path operations, object store operations
//! - `DeviceError`: disk monitoring reported the writer's mount unhealthy
//!
//! ## Cloneability
//!
//! The first error a writer encounters is latched on its flush notifier and
//! surfaced from every subsequent operation, so the enum is `Clone`: source
//! errors are rendered into the variant at conversion time.

use shufflehouse_core::DiskStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(String),

    #[error("writer already closed: {0}")]
    AlreadyClosed(String),

    #[error("timed out {0}")]
    Timeout(String),

    #[error("device error on {mount}: {status}")]
    DeviceError { mount: String, status: DiskStatus },

    #[error("flush buffer exhausted: {0}")]
    BufferExhausted(String),

    #[error("writer destroyed")]
    Destroyed,
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(error: object_store::Error) -> Self {
        Error::Io(error.to_string())
    }
}

impl From<shufflehouse_core::Error> for Error {
    fn from(error: shufflehouse_core::Error) -> Self {
        Error::Io(error.to_string())
    }
}
