//! Configuration for the tile cache and the `offline-tiles` binary.
//!
//! [`CacheConfig`] is a plain value built once per controller. It doubles as
//! a clap argument group, so the binary exposes every option as a flag and an
//! environment variable with the `TILES_` prefix:
//!
//! - `TILES_USE_CACHE` - Master switch for caching (default: false)
//! - `TILES_SAVE_TO_CACHE` - Persist fetched tiles (default: true)
//! - `TILES_USE_ONLY_CACHE` - Never touch the network (default: false)
//! - `TILES_CACHE_FORMAT` - Stored image format (default: image/png)
//! - `TILES_CACHE_MAX_AGE` - Staleness threshold in ms (default: 86400000)
//! - `TILES_DB_SIZE_LIMIT` - Advisory store budget in MB (default: 40)
//! - `TILES_EVICTION_EVERY` - Saves between sweep checks (default: 100)
//! - `TILES_EVICTION_THRESHOLD` - Entry count that makes a sweep delete (default: 200)
//! - `TILES_STORE` - Path of the tile store log
//!
//! # Example
//!
//! ```
//! use offline_tiles::config::CacheConfig;
//!
//! let config = CacheConfig {
//!     enabled: true,
//!     max_age_millis: 60_000,
//!     ..CacheConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::tile::TileFormat;

// =============================================================================
// Default Values
// =============================================================================

/// Default maximum tile age: 24 hours.
pub const DEFAULT_MAX_AGE_MILLIS: u64 = 24 * 3600 * 1000;

/// Default advisory store size budget in MB.
pub const DEFAULT_SIZE_LIMIT_MB: u64 = 40;

/// Default number of saves between eviction checks.
pub const DEFAULT_EVICTION_EVERY_N_SAVES: usize = 100;

/// Default entry count above which a sweep removes data.
pub const DEFAULT_EVICTION_ENTRY_THRESHOLD: usize = 200;

/// Default stored image format.
pub const DEFAULT_IMAGE_FORMAT: &str = "image/png";

/// Assumed weight of a single stored tile, used to size the budget.
pub const ESTIMATED_TILE_SIZE_KB: u64 = 12;

// =============================================================================
// Cache Configuration
// =============================================================================

/// Options governing a [`TileCacheController`](crate::tile::TileCacheController).
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Use the tile cache. When off, every tile is fetched from the network.
    #[arg(long = "use-cache", default_value_t = false, env = "TILES_USE_CACHE")]
    pub enabled: bool,

    /// Save fetched tiles to the cache.
    #[arg(
        long = "save-to-cache",
        default_value_t = true,
        action = ArgAction::Set,
        env = "TILES_SAVE_TO_CACHE"
    )]
    pub save_enabled: bool,

    /// Never fetch from the network. Misses serve an empty image and stale
    /// tiles are served without revalidation.
    #[arg(
        long = "use-only-cache",
        default_value_t = false,
        env = "TILES_USE_ONLY_CACHE"
    )]
    pub fetch_only_from_cache: bool,

    /// Image format for stored tiles (image/png or image/jpeg).
    #[arg(
        long = "cache-format",
        default_value = DEFAULT_IMAGE_FORMAT,
        env = "TILES_CACHE_FORMAT"
    )]
    pub image_format: TileFormat,

    /// Maximum age of a cached tile in milliseconds.
    #[arg(
        long = "cache-max-age",
        default_value_t = DEFAULT_MAX_AGE_MILLIS,
        env = "TILES_CACHE_MAX_AGE"
    )]
    pub max_age_millis: u64,

    /// Advisory size budget for the store in MB.
    #[arg(
        long = "db-size-limit",
        default_value_t = DEFAULT_SIZE_LIMIT_MB,
        env = "TILES_DB_SIZE_LIMIT"
    )]
    pub size_limit_mb: u64,

    /// Number of saves between eviction checks.
    #[arg(
        long = "eviction-every",
        default_value_t = DEFAULT_EVICTION_EVERY_N_SAVES,
        env = "TILES_EVICTION_EVERY"
    )]
    pub eviction_trigger_every_n_saves: usize,

    /// Entry count above which an eviction sweep removes over-age tiles.
    #[arg(
        long = "eviction-threshold",
        default_value_t = DEFAULT_EVICTION_ENTRY_THRESHOLD,
        env = "TILES_EVICTION_THRESHOLD"
    )]
    pub eviction_entry_count_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            save_enabled: true,
            fetch_only_from_cache: false,
            image_format: TileFormat::Png,
            max_age_millis: DEFAULT_MAX_AGE_MILLIS,
            size_limit_mb: DEFAULT_SIZE_LIMIT_MB,
            eviction_trigger_every_n_saves: DEFAULT_EVICTION_EVERY_N_SAVES,
            eviction_entry_count_threshold: DEFAULT_EVICTION_ENTRY_THRESHOLD,
        }
    }
}

impl CacheConfig {
    /// Default configuration with caching switched on.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.eviction_trigger_every_n_saves == 0 {
            return Err("eviction_trigger_every_n_saves must be greater than 0".to_string());
        }

        if self.size_limit_mb == 0 {
            return Err("size_limit_mb must be greater than 0".to_string());
        }

        if self.fetch_only_from_cache && !self.enabled {
            return Err(
                "fetch_only_from_cache has no effect unless caching is enabled. \
                 Set --use-cache or TILES_USE_CACHE"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// The advisory size budget in bytes.
    pub fn size_budget_bytes(&self) -> u64 {
        self.size_limit_mb.saturating_mul(1024 * 1024)
    }

    /// How many tiles fit in the size budget at the assumed tile weight.
    pub fn estimated_entry_capacity(&self) -> usize {
        (self.size_limit_mb.saturating_mul(1024) / ESTIMATED_TILE_SIZE_KB) as usize
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// offline-tiles - a persistent cache for map tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "offline-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve tiles through the cache.
    Resolve(ResolveConfig),

    /// Run one eviction sweep over a store.
    Sweep(SweepConfig),

    /// Print store statistics.
    Info(InfoConfig),
}

/// Arguments for `offline-tiles resolve`.
#[derive(Args, Debug, Clone)]
pub struct ResolveConfig {
    /// Tile URLs to resolve.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Path of the tile store log.
    #[arg(long, env = "TILES_STORE")]
    pub store: PathBuf,

    /// Directory to write served tiles into.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub cache: CacheConfig,
}

impl ResolveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.urls.iter().any(|url| url.trim().is_empty()) {
            return Err("Tile URLs must not be empty".to_string());
        }
        self.cache.validate()
    }
}

/// Arguments for `offline-tiles sweep`.
#[derive(Args, Debug, Clone)]
pub struct SweepConfig {
    /// Path of the tile store log.
    #[arg(long, env = "TILES_STORE")]
    pub store: PathBuf,

    /// Maximum age of a tile in milliseconds.
    #[arg(
        long = "cache-max-age",
        default_value_t = DEFAULT_MAX_AGE_MILLIS,
        env = "TILES_CACHE_MAX_AGE"
    )]
    pub max_age_millis: u64,

    /// Only sweep when the store holds more entries than this.
    #[arg(
        long = "eviction-threshold",
        default_value_t = DEFAULT_EVICTION_ENTRY_THRESHOLD,
        env = "TILES_EVICTION_THRESHOLD"
    )]
    pub threshold: usize,
}

/// Arguments for `offline-tiles info`.
#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Path of the tile store log.
    #[arg(long, env = "TILES_STORE")]
    pub store: PathBuf,
}

// =============================================================================
// Tests
// =============================================================================
