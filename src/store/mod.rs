//! Persistent tile store abstraction.
//!
//! The cache controller talks to its backing store exclusively through the
//! [`TileStore`] trait. A store holds at most one [`CacheEntry`] per tile key
//! and offers four kinds of operations:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        TileStore                         │
//! │  get(key)            point lookup                        │
//! │  upsert(key, mutate) atomic per-key read-modify-write    │
//! │  entries()           snapshot for eviction sweeps        │
//! │  bulk_delete / compact / info   maintenance              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local, used by tests and embedders that don't
//!   need persistence
//! - [`FileStore`]: append-only JSON-lines log with compaction

mod file;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use file::FileStore;
pub use memory::MemoryStore;

// =============================================================================
// Revision
// =============================================================================

/// Opaque version token assigned by the store on every write.
///
/// Revisions are only compared for equality; callers never derive meaning
/// from their value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    pub(crate) fn from_sequence(sequence: u64) -> Self {
        Self(sequence)
    }

    pub(crate) fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// A stored tile.
///
/// Serialized as `{ "id", "encodedImage", "timestamp", "revision" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Tile URL
    #[serde(rename = "id")]
    pub key: String,

    /// Encoded image payload (a data URL)
    pub encoded_image: String,

    /// Last write time, milliseconds since the Unix epoch
    pub timestamp: u64,

    /// Store-assigned version of this record
    pub revision: Revision,
}

impl CacheEntry {
    /// The document view of this entry, as handed to upsert mutators.
    pub fn to_document(&self) -> TileDocument {
        TileDocument {
            encoded_image: Some(self.encoded_image.clone()),
            timestamp: self.timestamp,
        }
    }

    /// Approximate number of bytes this entry occupies.
    pub fn approximate_size(&self) -> u64 {
        (self.key.len() + self.encoded_image.len() + 2 * std::mem::size_of::<u64>()) as u64
    }
}

/// The mutable part of an entry, seen by upsert mutators.
///
/// A key with no stored entry is presented as `TileDocument::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileDocument {
    pub encoded_image: Option<String>,
    pub timestamp: u64,
}

/// Identifies one entry revision to remove in a bulk delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub key: String,
    pub revision: Revision,
}

impl From<&CacheEntry> for DeleteTarget {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            revision: entry.revision,
        }
    }
}

/// Store introspection result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreInfo {
    /// Number of live entries
    pub entry_count: usize,

    /// Bytes occupied by the store, including space not yet reclaimed
    pub size_bytes: u64,
}

// =============================================================================
// TileStore Trait
// =============================================================================

/// Async key-value store for cached tiles, keyed by tile URL.
///
/// Implementations must serialize concurrent upserts to the same key so no
/// update is lost. No ordering is promised across different keys, and the
/// maintenance operations have no transactional link to reads and writes.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Look up the entry for `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Atomically read-modify-write the entry for `key`.
    ///
    /// `mutate` receives the current document (or an empty one) and returns
    /// the document to persist. The returned document must carry an image.
    async fn upsert<F>(&self, key: &str, mutate: F) -> Result<Revision, StoreError>
    where
        F: FnOnce(TileDocument) -> TileDocument + Send + 'static;

    /// Snapshot of every live entry.
    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError>;

    /// Remove each target whose revision still matches the stored one.
    ///
    /// Targets that were rewritten or removed since the caller read them are
    /// skipped. Returns the number of entries actually removed.
    async fn bulk_delete(&self, targets: &[DeleteTarget]) -> Result<usize, StoreError>;

    /// Reclaim space left behind by overwritten and deleted entries.
    async fn compact(&self) -> Result<(), StoreError>;

    /// Entry count and size.
    async fn info(&self) -> Result<StoreInfo, StoreError>;
}

/// Run an upsert mutator against the current entry and build the record to
/// store. Shared by the bundled backends.
pub(crate) fn apply_mutation<F>(
    key: &str,
    current: Option<&CacheEntry>,
    revision: Revision,
    mutate: F,
) -> Result<CacheEntry, StoreError>
where
    F: FnOnce(TileDocument) -> TileDocument,
{
    let document = current.map(CacheEntry::to_document).unwrap_or_default();
    let updated = mutate(document);

    let encoded_image = updated.encoded_image.ok_or_else(|| StoreError::MissingImage {
        key: key.to_string(),
    })?;

    Ok(CacheEntry {
        key: key.to_string(),
        encoded_image,
        timestamp: updated.timestamp,
        revision,
    })
}
