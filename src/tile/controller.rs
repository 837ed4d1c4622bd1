//! Tile cache controller.
//!
//! The controller is the entry point for tile requests. For one key it:
//! - Looks the tile up in the store (a failed read counts as a miss)
//! - Classifies the entry as fresh, stale or missing
//! - Serves, fetches or revalidates according to the configuration
//! - Encodes and saves fetched tiles without making the caller wait
//! - Counts saves and triggers eviction checks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      TileCacheController                        │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                      resolve(key)                         │  │
//! │  │  1. Lookup          3. Serve / fetch / revalidate         │  │
//! │  │  2. Plan action     4. Spawn save (encode + upsert)       │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │        │              │               │               │         │
//! │        ▼              ▼               ▼               ▼         │
//! │  ┌───────────┐ ┌─────────────┐ ┌─────────────┐ ┌─────────────┐  │
//! │  │ TileStore │ │ TileFetcher │ │ TileEncoder │ │  Eviction   │  │
//! │  └───────────┘ └─────────────┘ └─────────────┘ └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent requests for the same key are not coalesced. Each one reads,
//! may fetch and may save; the store's per-key upsert keeps the entry
//! consistent.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, EncodeError};
use crate::store::{CacheEntry, Revision, TileDocument, TileStore};

use super::encoder::{from_data_url, DataUrlEncoder, TileEncoder, EMPTY_IMAGE_DATA_URL};
use super::events::{CacheEvent, EVENT_CHANNEL_CAPACITY};
use super::eviction::{EvictionCounter, EvictionManager};
use super::fetcher::TileFetcher;
use super::policy::{plan, CacheAction, Lookup, RequestContext};

// =============================================================================
// Tile Response
// =============================================================================

/// The image served for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileData {
    /// Freshly fetched tile body
    Network(Bytes),

    /// Stored payload, served without touching the network
    Cached(String),

    /// Stored payload served because revalidation failed
    Stale(String),

    /// Nothing cached and the network is off limits
    Placeholder,
}

impl TileData {
    /// Whether the image came from the network.
    pub fn is_from_network(&self) -> bool {
        matches!(self, TileData::Network(_))
    }

    /// The data URL to display, for everything not fetched just now.
    pub fn data_url(&self) -> Option<&str> {
        match self {
            TileData::Cached(url) | TileData::Stale(url) => Some(url),
            TileData::Placeholder => Some(EMPTY_IMAGE_DATA_URL),
            TileData::Network(_) => None,
        }
    }

    /// Image bytes, decoding stored payloads with `encoder`.
    pub fn to_bytes<E: TileEncoder + ?Sized>(&self, encoder: &E) -> Result<Bytes, EncodeError> {
        match self {
            TileData::Network(data) => Ok(data.clone()),
            TileData::Cached(url) | TileData::Stale(url) => encoder.decode(url),
            TileData::Placeholder => from_data_url(EMPTY_IMAGE_DATA_URL),
        }
    }
}

/// Response from [`TileCacheController::resolve`].
#[derive(Debug)]
pub struct TileResponse {
    /// The requested tile key
    pub key: String,

    /// The action the controller took
    pub action: CacheAction,

    /// The image to display
    pub data: TileData,

    /// The save started for this tile, if any.
    ///
    /// Dropping it detaches the save; it still runs and reports failures
    /// through logs and `cache-error` events.
    pub pending_save: Option<PendingSave>,
}

impl TileResponse {
    fn new(
        key: &str,
        action: CacheAction,
        data: TileData,
        pending_save: Option<PendingSave>,
    ) -> Self {
        Self {
            key: key.to_string(),
            action,
            data,
            pending_save,
        }
    }

    /// Whether the tile was served from the store.
    pub fn cache_hit(&self) -> bool {
        matches!(self.data, TileData::Cached(_) | TileData::Stale(_))
    }

    /// Wait for the save started by this request, if there was one.
    pub async fn wait_for_save(&mut self) -> Option<Result<Revision, CacheError>> {
        match self.pending_save.take() {
            Some(pending) => Some(pending.wait().await),
            None => None,
        }
    }
}

/// Handle on a save running in the background.
#[derive(Debug)]
pub struct PendingSave {
    handle: JoinHandle<Result<Revision, CacheError>>,
}

impl PendingSave {
    /// Wait for the save (and any eviction sweep it triggered) to finish.
    pub async fn wait(self) -> Result<Revision, CacheError> {
        self.handle
            .await
            .unwrap_or_else(|e| Err(CacheError::SaveAborted(e.to_string())))
    }
}

// =============================================================================
// Tile Cache Controller
// =============================================================================

/// Caching front for a tile fetcher.
///
/// # Type Parameters
///
/// * `S` - The tile store
/// * `F` - The network fetcher
/// * `E` - The encoder producing stored payloads
///
/// # Example
///
/// ```ignore
/// use offline_tiles::config::CacheConfig;
/// use offline_tiles::store::FileStore;
/// use offline_tiles::tile::{HttpTileFetcher, TileCacheController};
///
/// let store = FileStore::open("tiles.log").await?;
/// let controller = TileCacheController::new(CacheConfig::enabled(), store, HttpTileFetcher::new()?);
///
/// let response = controller.resolve("https://tile.example.org/3/4/2.png").await?;
/// println!("{}: cache hit: {}", response.action, response.cache_hit());
/// ```
pub struct TileCacheController<S, F, E = DataUrlEncoder> {
    config: CacheConfig,
    store: Arc<S>,
    fetcher: F,
    encoder: E,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<CacheEvent>,
    counter: Arc<EvictionCounter>,
    eviction: EvictionManager,
}

impl<S: TileStore + 'static, F: TileFetcher> TileCacheController<S, F, DataUrlEncoder> {
    /// Create a controller owning `store`.
    pub fn new(config: CacheConfig, store: S, fetcher: F) -> Self {
        Self::with_shared_store(config, Arc::new(store), fetcher)
    }

    /// Create a controller over a store shared with other components.
    pub fn with_shared_store(config: CacheConfig, store: Arc<S>, fetcher: F) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            counter: Arc::new(EvictionCounter::new(config.eviction_trigger_every_n_saves)),
            eviction: EvictionManager::from_config(&config),
            encoder: DataUrlEncoder::new(),
            clock: Arc::new(SystemClock),
            config,
            store,
            fetcher,
            events,
        }
    }
}

impl<S: TileStore + 'static, F: TileFetcher, E: TileEncoder> TileCacheController<S, F, E> {
    /// Replace the encoder.
    pub fn with_encoder<E2: TileEncoder>(self, encoder: E2) -> TileCacheController<S, F, E2> {
        TileCacheController {
            config: self.config,
            store: self.store,
            fetcher: self.fetcher,
            encoder,
            clock: self.clock,
            events: self.events,
            counter: self.counter,
            eviction: self.eviction,
        }
    }

    /// Replace the clock used for freshness and write timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Subscribe to hit, miss and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Saves left before the next eviction check.
    pub fn saves_until_eviction_check(&self) -> usize {
        self.counter.remaining()
    }

    /// Resolve a tile.
    ///
    /// # Errors
    ///
    /// Only a failed network fetch with nothing cached to fall back on is an
    /// error. Store failures degrade to a miss and save failures are reported
    /// as `cache-error` events.
    pub async fn resolve(&self, key: &str) -> Result<TileResponse, CacheError> {
        let ctx = RequestContext::new(key, &self.config, self.clock.now_millis());

        if !ctx.config.enabled {
            let data = self.fetcher.fetch(key).await?;
            return Ok(TileResponse::new(
                key,
                CacheAction::Passthrough,
                TileData::Network(data),
                None,
            ));
        }

        let lookup = self.lookup(&ctx).await;
        let action = plan(&lookup, &ctx);
        debug!(key, %action, "Tile cache lookup");

        match (action, lookup.into_entry()) {
            (CacheAction::ServeCached, Some(entry)) => Ok(TileResponse::new(
                key,
                action,
                TileData::Cached(entry.encoded_image),
                None,
            )),
            (CacheAction::Revalidate, Some(entry)) => Ok(self.revalidate(&ctx, entry).await),
            (CacheAction::ServePlaceholder, _) => Ok(TileResponse::new(
                key,
                action,
                TileData::Placeholder,
                None,
            )),
            _ => self.fetch_then_save(&ctx).await,
        }
    }

    async fn lookup(&self, ctx: &RequestContext<'_>) -> Lookup {
        let entry = match self.store.get(ctx.key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = ctx.key, error = %e, "Tile store read failed, treating as miss");
                None
            }
        };

        let lookup = Lookup::classify(entry, ctx);
        let key = ctx.key.to_string();
        self.emit(if lookup.is_hit() {
            CacheEvent::Hit { key }
        } else {
            CacheEvent::Miss { key }
        });

        lookup
    }

    async fn revalidate(&self, ctx: &RequestContext<'_>, stale: CacheEntry) -> TileResponse {
        match self.fetcher.fetch(ctx.key).await {
            Ok(data) => {
                let pending = self.save(ctx, &data);
                TileResponse::new(ctx.key, CacheAction::Revalidate, TileData::Network(data), pending)
            }
            Err(e) => {
                debug!(key = ctx.key, error = %e, "Revalidation failed, serving stale tile");
                TileResponse::new(
                    ctx.key,
                    CacheAction::Revalidate,
                    TileData::Stale(stale.encoded_image),
                    None,
                )
            }
        }
    }

    async fn fetch_then_save(&self, ctx: &RequestContext<'_>) -> Result<TileResponse, CacheError> {
        let data = self.fetcher.fetch(ctx.key).await?;
        let pending = self.save(ctx, &data);
        Ok(TileResponse::new(
            ctx.key,
            CacheAction::FetchThenSave,
            TileData::Network(data),
            pending,
        ))
    }

    /// Encode `data` and start persisting it.
    fn save(&self, ctx: &RequestContext<'_>, data: &[u8]) -> Option<PendingSave> {
        if !ctx.config.save_enabled {
            return None;
        }

        let encoded = match self.encoder.encode(data, ctx.config.image_format) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = ctx.key, error = %e, "Failed to encode tile for caching");
                self.emit(CacheEvent::Error {
                    key: ctx.key.to_string(),
                    error: e.into(),
                });
                return None;
            }
        };

        let job = SaveJob {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            counter: Arc::clone(&self.counter),
            eviction: self.eviction.clone(),
            clock: Arc::clone(&self.clock),
            key: ctx.key.to_string(),
            encoded,
        };

        Some(PendingSave {
            handle: tokio::spawn(job.run()),
        })
    }

    fn emit(&self, event: CacheEvent) {
        publish(&self.events, event);
    }
}

// =============================================================================
// Save Path
// =============================================================================

/// Merge a freshly encoded tile into the stored document.
///
/// The first image stored for a key is kept; later saves, including
/// revalidations, only move the timestamp forward.
pub fn merge_tile_document(current: TileDocument, encoded: String, timestamp: u64) -> TileDocument {
    TileDocument {
        encoded_image: current.encoded_image.or(Some(encoded)),
        timestamp: current.timestamp.max(timestamp),
    }
}

/// Everything a detached save needs, owned.
struct SaveJob<S> {
    store: Arc<S>,
    events: broadcast::Sender<CacheEvent>,
    counter: Arc<EvictionCounter>,
    eviction: EvictionManager,
    clock: Arc<dyn Clock>,
    key: String,
    encoded: String,
}

impl<S: TileStore + 'static> SaveJob<S> {
    async fn run(self) -> Result<Revision, CacheError> {
        let SaveJob {
            store,
            events,
            counter,
            eviction,
            clock,
            key,
            encoded,
        } = self;

        let timestamp = clock.now_millis();
        let result = store
            .upsert(&key, move |doc| merge_tile_document(doc, encoded, timestamp))
            .await;

        match result {
            Ok(revision) => {
                debug!(key = %key, %revision, "Saved tile");
                if counter.record_save() {
                    eviction.maybe_sweep(store.as_ref(), clock.now_millis()).await;
                }
                Ok(revision)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to save tile");
                let error = CacheError::from(e);
                publish(
                    &events,
                    CacheEvent::Error {
                        key,
                        error: error.clone(),
                    },
                );
                Err(error)
            }
        }
    }
}

fn publish(events: &broadcast::Sender<CacheEvent>, event: CacheEvent) {
    debug!(event = event.name(), key = event.key(), "Cache event");
    // No subscribers is fine
    let _ = events.send(event);
}
