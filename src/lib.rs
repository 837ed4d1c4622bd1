//! # offline-tiles
//!
//! A persistent cache for map tiles, placed in front of whatever fetches them.
//!
//! Given a tile URL, the cache serves a stored copy while it is fresh,
//! revalidates it once it is stale (falling back to the stale copy if the
//! network fails), fetches and stores tiles it has never seen, and serves an
//! empty placeholder in offline mode. A save-paced eviction sweep keeps the
//! store bounded.
//!
//! ## Architecture
//!
//! - [`tile`] - Cache controller, freshness policy, eviction, encoder, fetcher
//! - [`store`] - Tile store trait with in-memory and append-log backends
//! - [`config`] - Cache options and CLI types
//! - [`clock`] - Wall-clock abstraction
//!
//! ## Example
//!
//! ```rust,no_run
//! use offline_tiles::{CacheConfig, FileStore, HttpTileFetcher, TileCacheController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileStore::open("tiles.log").await?;
//!     let controller =
//!         TileCacheController::new(CacheConfig::enabled(), store, HttpTileFetcher::new()?);
//!
//!     let mut response = controller
//!         .resolve("https://tile.openstreetmap.org/3/4/2.png")
//!         .await?;
//!     println!("{} (cache hit: {})", response.action, response.cache_hit());
//!
//!     // Saves run in the background; wait before exiting
//!     response.wait_for_save().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, Cli, Command, InfoConfig, ResolveConfig, SweepConfig};
pub use error::{CacheError, EncodeError, FetchError, StoreError};
pub use store::{
    CacheEntry, DeleteTarget, FileStore, MemoryStore, Revision, StoreInfo, TileDocument, TileStore,
};
pub use tile::{
    classify, merge_tile_document, plan, CacheAction, CacheEvent, DataUrlEncoder, EvictionCounter,
    EvictionManager, Freshness, HttpTileFetcher, Lookup, PendingSave, RequestContext, SweepReport,
    TileCacheController, TileData, TileEncoder, TileFetcher, TileFormat, TileResponse,
    EMPTY_IMAGE_DATA_URL,
};
