//! Tile cache layer.
//!
//! This module decides, for each tile request, whether to serve a stored
//! copy, fetch a fresh one, or revalidate a stale one, and keeps the store
//! bounded.
//!
//! # Architecture
//!
//! The controller sits between the host that displays tiles and the
//! network:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Host (tile layer / CLI)          │
//! └────────────────────┬────────────────────┘
//!                      │ resolve(url)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          TileCacheController            │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │   policy     │  │  DataUrlEncoder │  │
//! │  │  (fresh /    │  │  (decode →      │  │
//! │  │   stale)     │  │   data URL)     │  │
//! │  └──────────────┘  └─────────────────┘  │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  Eviction    │  │  CacheEvent     │  │
//! │  │  Manager     │  │  broadcast      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            │                     │
//!            ▼                     ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │     TileStore      │ │   TileFetcher    │
//! └────────────────────┘ └──────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCacheController`]: Entry point, runs one request end to end
//! - [`classify`] / [`plan`]: Pure freshness and action decisions
//! - [`EvictionManager`]: Threshold-gated sweep of over-age tiles
//! - [`EvictionCounter`]: Save countdown that paces eviction checks
//! - [`DataUrlEncoder`]: Re-encodes fetched tiles into stored data URLs
//! - [`HttpTileFetcher`]: reqwest-based network access
//! - [`CacheEvent`]: Hit / miss / error notifications for the host
//!
//! # Example
//!
//! ```
//! use offline_tiles::tile::{classify, Freshness};
//!
//! let now = 1_700_000_010_000;
//! assert_eq!(classify(now - 10_000, now, 5_000), Freshness::Stale);
//! assert_eq!(classify(now - 1_000, now, 5_000), Freshness::Fresh);
//! ```

mod controller;
mod encoder;
mod events;
mod eviction;
mod fetcher;
mod policy;

pub use controller::{merge_tile_document, PendingSave, TileCacheController, TileData, TileResponse};
pub use encoder::{
    from_data_url, to_data_url, DataUrlEncoder, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY,
    EMPTY_IMAGE_DATA_URL,
};
pub use events::{CacheEvent, EVENT_CHANNEL_CAPACITY};
pub use eviction::{EvictionCounter, EvictionManager, SweepReport};
pub use fetcher::{HttpTileFetcher, TileFetcher};
pub use policy::{classify, plan, CacheAction, Freshness, Lookup, RequestContext};
