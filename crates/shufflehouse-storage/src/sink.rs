//! Backing Sinks
//!
//! A sink is the sequential append target for one partition file: either a
//! local file or a streaming upload to the distributed object store. Appends
//! are strictly sequential, with no seeks and no concurrent appenders, which
//! is what lets the chunk-offset table describe the file as a flat byte
//! range.
//!
//! The distributed variant additionally needs `exists`/`create`/`delete`
//! path operations at close time (success markers, the index sidecar, and
//! the replication race); those are free functions over the store handle so
//! the writer can run them after the stream itself is finished.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::{MultipartId, ObjectStore};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::pool::CompositeBuffer;

pub enum Sink {
    Local {
        file: Option<File>,
        path: PathBuf,
    },
    Dfs {
        writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
        multipart_id: MultipartId,
        store: Arc<dyn ObjectStore>,
        path: StorePath,
    },
}

impl Sink {
    /// Create (truncating) a local partition file and its parent directory.
    pub async fn open_local(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        Ok(Sink::Local {
            file: Some(file),
            path,
        })
    }

    /// Start a streaming upload to the distributed store.
    pub async fn open_dfs(store: Arc<dyn ObjectStore>, path: StorePath) -> Result<Self> {
        let (multipart_id, writer) = store.put_multipart(&path).await?;
        Ok(Sink::Dfs {
            writer: Some(writer),
            multipart_id,
            store,
            path,
        })
    }

    /// Append the gathered segments of one flush buffer, in order.
    pub async fn append(&mut self, buffer: &CompositeBuffer) -> Result<()> {
        match self {
            Sink::Local { file, path } => {
                let file = file.as_mut().ok_or_else(|| {
                    Error::Io(format!("sink for {} is already closed", path.display()))
                })?;
                for segment in buffer.segments() {
                    file.write_all(segment).await?;
                }
                Ok(())
            }
            Sink::Dfs { writer, path, .. } => {
                let writer = writer
                    .as_mut()
                    .ok_or_else(|| Error::Io(format!("sink for {path} is already closed")))?;
                for segment in buffer.segments() {
                    writer.write_all(segment).await?;
                }
                Ok(())
            }
        }
    }

    /// Finish the sink: fsync the local file, or complete the streaming
    /// upload. Idempotent once the handle is gone.
    pub async fn close(&mut self) -> Result<()> {
        match self {
            Sink::Local { file, .. } => {
                if let Some(mut file) = file.take() {
                    file.flush().await?;
                    file.sync_all().await?;
                }
                Ok(())
            }
            Sink::Dfs { writer, .. } => {
                if let Some(mut writer) = writer.take() {
                    writer.shutdown().await?;
                }
                Ok(())
            }
        }
    }

    /// Drop the handle without publishing: local data is left for the
    /// caller's delete pass, a streaming upload is cancelled.
    pub async fn abort(&mut self) -> Result<()> {
        match self {
            Sink::Local { file, .. } => {
                file.take();
                Ok(())
            }
            Sink::Dfs {
                writer,
                multipart_id,
                store,
                path,
            } => {
                if writer.take().is_some() {
                    store.abort_multipart(path, multipart_id).await?;
                }
                Ok(())
            }
        }
    }
}

pub async fn dfs_exists(store: &dyn ObjectStore, path: &StorePath) -> Result<bool> {
    match store.head(path).await {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(error) => Err(error.into()),
    }
}

/// Publish a zero-byte marker object.
pub async fn dfs_create_marker(store: &dyn ObjectStore, path: &StorePath) -> Result<()> {
    store.put(path, Bytes::new()).await?;
    Ok(())
}

pub async fn dfs_delete(store: &dyn ObjectStore, path: &StorePath) -> Result<()> {
    match store.delete(path).await {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
        Err(error) => Err(error.into()),
    }
}
