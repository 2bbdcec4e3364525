//! Partition File Metadata
//!
//! One `FileMeta` exists per partition file being written. It is created by
//! slot reservation, mutated only by its owning writer until close, and then
//! frozen and published to the commit reply.
//!
//! ## What It Tracks
//!
//! - Where the file lives: local disk or the distributed store, plus the
//!   derived sidecar paths (`<path>.success`, `<path>.index`) and, for a
//!   replicated distributed file, the peer replica's success-marker path.
//! - The chunk-offset table: monotonically non-decreasing byte positions at
//!   which a reader may begin a range fetch. The owning writer appends an
//!   offset whenever the flushed byte count crosses a chunk boundary, and a
//!   final offset at close so the table always ends at end-of-file.
//! - Optionally, a presence bitmap of the 32-bit map ids that contributed
//!   records, used by range-read filtering on the fetch side.

use roaring::RoaringBitmap;

/// Which backing store holds the partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    LocalDisk,
    DistributedFs,
}

/// Metadata for a single partition file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    kind: StorageKind,
    data_path: String,
    peer_success_path: Option<String>,
    chunk_offsets: Vec<u64>,
    map_id_bitmap: Option<RoaringBitmap>,
}

impl FileMeta {
    pub fn new(kind: StorageKind, data_path: impl Into<String>) -> Self {
        Self {
            kind,
            data_path: data_path.into(),
            peer_success_path: None,
            chunk_offsets: Vec::new(),
            map_id_bitmap: None,
        }
    }

    /// Set the peer replica's success-marker path (distributed store only).
    /// If that marker exists at close time, the peer won the replication
    /// race and this file is deleted instead of published.
    pub fn with_peer_success_path(mut self, path: impl Into<String>) -> Self {
        self.peer_success_path = Some(path.into());
        self
    }

    /// Enable map-id tracking. The owning writer records one id per write.
    pub fn with_map_id_tracking(mut self) -> Self {
        self.map_id_bitmap = Some(RoaringBitmap::new());
        self
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn data_path(&self) -> &str {
        &self.data_path
    }

    /// Zero-byte marker advertising that the file is fully written.
    pub fn success_path(&self) -> String {
        format!("{}.success", self.data_path)
    }

    /// Sidecar file carrying the encoded chunk-offset table.
    pub fn index_path(&self) -> String {
        format!("{}.index", self.data_path)
    }

    pub fn peer_success_path(&self) -> Option<&str> {
        self.peer_success_path.as_deref()
    }

    /// Append a chunk offset. Offsets never decrease.
    pub fn add_chunk_offset(&mut self, offset: u64) {
        debug_assert!(
            offset >= self.last_chunk_offset(),
            "chunk offsets must be non-decreasing"
        );
        self.chunk_offsets.push(offset);
    }

    /// The most recently recorded offset, or 0 for an empty table.
    pub fn last_chunk_offset(&self) -> u64 {
        self.chunk_offsets.last().copied().unwrap_or(0)
    }

    pub fn chunk_offsets(&self) -> &[u64] {
        &self.chunk_offsets
    }

    pub fn add_map_id(&mut self, map_id: u32) {
        if let Some(bitmap) = &mut self.map_id_bitmap {
            bitmap.insert(map_id);
        }
    }

    pub fn map_id_bitmap(&self) -> Option<&RoaringBitmap> {
        self.map_id_bitmap.as_ref()
    }
}
