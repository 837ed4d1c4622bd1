//! Test utilities for integration tests.
//!
//! This module provides a scripted fetcher, an instrumented store and helpers
//! for building tiles and controllers with a pinned clock.

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use offline_tiles::{
    CacheConfig, CacheEntry, CacheEvent, DataUrlEncoder, DeleteTarget, FetchError, ManualClock,
    MemoryStore, Revision, StoreError, StoreInfo, TileCacheController, TileDocument, TileEncoder,
    TileFetcher, TileFormat, TileStore,
};

/// Fixed "now" used by every test clock.
pub const NOW: u64 = 1_700_000_000_000;

// =============================================================================
// Tiles
// =============================================================================

/// A small solid-color PNG tile.
pub fn png_tile(shade: u8) -> Bytes {
    let img = RgbImage::from_pixel(8, 8, Rgb([shade, shade, 255 - shade]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    Bytes::from(buf.into_inner())
}

/// The payload the default encoder stores for `tile`.
pub fn encoded(tile: &[u8]) -> String {
    DataUrlEncoder::new()
        .encode(tile, TileFormat::Png)
        .expect("Failed to encode test tile")
}

// =============================================================================
// Mock Fetcher with Call Tracking
// =============================================================================

/// A fetcher serving tiles from a map and counting every call.
///
/// URLs without a registered tile fail like an unreachable network.
#[derive(Clone, Default)]
pub struct MockFetcher {
    tiles: Arc<Mutex<HashMap<String, Bytes>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(self, url: &str, data: Bytes) -> Self {
        self.set_tile(url, data);
        self
    }

    pub fn set_tile(&self, url: &str, data: Bytes) {
        self.tiles.lock().unwrap().insert(url.to_string(), data);
    }

    pub fn remove_tile(&self, url: &str) {
        self.tiles.lock().unwrap().remove(url);
    }

    /// Total number of fetches across all URLs.
    pub fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn fetch_count_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TileFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        let tile = self.tiles.lock().unwrap().get(url).cloned();
        tile.ok_or_else(|| FetchError::Connection(format!("no route to {}", url)))
    }
}

// =============================================================================
// Instrumented Store
// =============================================================================

/// A [`MemoryStore`] wrapper with failure switches and operation counters.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_maintenance: AtomicBool,
    upserts: AtomicUsize,
    bulk_deletes: AtomicUsize,
    compactions: AtomicUsize,
    rewrite_after_snapshot: Mutex<Option<(String, u64)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `info`, `entries`, `bulk_delete` and `compact` fail.
    pub fn set_fail_maintenance(&self, fail: bool) {
        self.fail_maintenance.store(fail, Ordering::SeqCst);
    }

    /// Rewrite `key` with `timestamp` right after the next `entries` snapshot,
    /// as a concurrent save would.
    pub fn rewrite_after_snapshot(&self, key: &str, timestamp: u64) {
        *self.rewrite_after_snapshot.lock().unwrap() = Some((key.to_string(), timestamp));
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn bulk_deletes(&self) -> usize {
        self.bulk_deletes.load(Ordering::SeqCst)
    }

    pub fn compactions(&self) -> usize {
        self.compactions.load(Ordering::SeqCst)
    }

    /// Store `image` under `key` without going through the counters.
    pub async fn seed(&self, key: &str, image: &str, timestamp: u64) -> Revision {
        let image = image.to_string();
        self.inner
            .upsert(key, move |_| TileDocument {
                encoded_image: Some(image),
                timestamp,
            })
            .await
            .expect("Failed to seed store")
    }

    /// Read an entry, bypassing the failure switches.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key).await.expect("Failed to read store")
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Io(format!("injected {} failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TileStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Self::check(&self.fail_reads, "read")?;
        self.inner.get(key).await
    }

    async fn upsert<F>(&self, key: &str, mutate: F) -> Result<Revision, StoreError>
    where
        F: FnOnce(TileDocument) -> TileDocument + Send + 'static,
    {
        Self::check(&self.fail_writes, "write")?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(key, mutate).await
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        Self::check(&self.fail_maintenance, "entries")?;
        let snapshot = self.inner.entries().await?;

        let rewrite = self.rewrite_after_snapshot.lock().unwrap().take();
        if let Some((key, timestamp)) = rewrite {
            self.inner
                .upsert(&key, move |doc| TileDocument { timestamp, ..doc })
                .await?;
        }

        Ok(snapshot)
    }

    async fn bulk_delete(&self, targets: &[DeleteTarget]) -> Result<usize, StoreError> {
        Self::check(&self.fail_maintenance, "bulk delete")?;
        self.bulk_deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.bulk_delete(targets).await
    }

    async fn compact(&self) -> Result<(), StoreError> {
        Self::check(&self.fail_maintenance, "compact")?;
        self.compactions.fetch_add(1, Ordering::SeqCst);
        self.inner.compact().await
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        Self::check(&self.fail_maintenance, "info")?;
        self.inner.info().await
    }
}

// =============================================================================
// Controller Helpers
// =============================================================================

/// Caching on, online, with the given max age.
pub fn online_config(max_age_millis: u64) -> CacheConfig {
    CacheConfig {
        max_age_millis,
        ..CacheConfig::enabled()
    }
}

/// Caching on, offline, with the given max age.
pub fn offline_config(max_age_millis: u64) -> CacheConfig {
    CacheConfig {
        fetch_only_from_cache: true,
        ..online_config(max_age_millis)
    }
}

/// Build a controller over `store` whose clock reads [`NOW`].
pub fn controller(
    config: CacheConfig,
    store: &Arc<RecordingStore>,
    fetcher: &MockFetcher,
) -> (
    TileCacheController<RecordingStore, MockFetcher>,
    Arc<ManualClock>,
) {
    let clock = Arc::new(ManualClock::new(NOW));
    let controller =
        TileCacheController::with_shared_store(config, Arc::clone(store), fetcher.clone())
            .with_clock(clock.clone());
    (controller, clock)
}

/// Everything currently queued on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Names of everything currently queued on `rx`.
pub fn drain_event_names(rx: &mut broadcast::Receiver<CacheEvent>) -> Vec<&'static str> {
    drain_events(rx).iter().map(CacheEvent::name).collect()
}
