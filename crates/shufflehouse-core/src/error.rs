//! Error Types for the Core Crate
//!
//! These cover the shared leaf types only: the chunk-index codec and file
//! metadata. The write path and the commit surface define their own richer
//! error enums on top of this one.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid chunk index: {0}")]
    InvalidIndex(String),
}
