//! In-memory tile store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::{apply_mutation, CacheEntry, DeleteTarget, Revision, StoreInfo, TileDocument, TileStore};

/// Process-local [`TileStore`] backed by a `HashMap`.
///
/// All writes take the same lock, which gives per-key upsert atomicity for
/// free. Nothing survives a restart.
///
/// # Example
///
/// ```
/// use offline_tiles::store::{MemoryStore, TileDocument, TileStore};
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///
///     store
///         .upsert("https://tiles.example/1/0/0.png", |_| TileDocument {
///             encoded_image: Some("data:image/png;base64,AAAA".to_string()),
///             timestamp: 1_000,
///         })
///         .await
///         .unwrap();
///
///     let info = store.info().await.unwrap();
///     assert_eq!(info.entry_count, 1);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    last_revision: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

#[async_trait]
impl TileStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.entries.get(key).cloned())
    }

    async fn upsert<F>(&self, key: &str, mutate: F) -> Result<Revision, StoreError>
    where
        F: FnOnce(TileDocument) -> TileDocument + Send + 'static,
    {
        let mut state = self.state.write().await;

        let revision = Revision::from_sequence(state.last_revision + 1);
        let entry = apply_mutation(key, state.entries.get(key), revision, mutate)?;

        state.last_revision = revision.sequence();
        state.entries.insert(key.to_string(), entry);

        Ok(revision)
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.entries.values().cloned().collect())
    }

    async fn bulk_delete(&self, targets: &[DeleteTarget]) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let mut removed = 0;

        for target in targets {
            let matches = state
                .entries
                .get(&target.key)
                .is_some_and(|entry| entry.revision == target.revision);

            if matches {
                state.entries.remove(&target.key);
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.entries.shrink_to_fit();
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let state = self.state.read().await;
        Ok(StoreInfo {
            entry_count: state.entries.len(),
            size_bytes: state.entries.values().map(CacheEntry::approximate_size).sum(),
        })
    }
}
