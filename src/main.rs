//! offline-tiles - command-line host for the tile cache.
//!
//! Resolves tiles through a file-backed cache, runs eviction sweeps and
//! reports store statistics.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_tiles::{
    config::{Cli, Command, InfoConfig, ResolveConfig, SweepConfig},
    Clock, EvictionManager, FileStore, HttpTileFetcher, SystemClock, TileCacheController,
    TileStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Resolve(config) => run_resolve(config).await,
        Command::Sweep(config) => run_sweep(config).await,
        Command::Info(config) => run_info(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "offline_tiles=debug"
    } else {
        "offline_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(path: &Path) -> Option<FileStore> {
    match FileStore::open(path).await {
        Ok(store) => Some(store),
        Err(e) => {
            error!("Failed to open tile store {}: {}", path.display(), e);
            None
        }
    }
}

// =============================================================================
// Resolve Command
// =============================================================================

async fn run_resolve(config: ResolveConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    if !config.cache.enabled {
        warn!("Caching is disabled; tiles are fetched without being stored. Pass --use-cache to enable it");
    }

    let Some(store) = open_store(&config.store).await else {
        return ExitCode::FAILURE;
    };

    let fetcher = match HttpTileFetcher::new() {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref dir) = config.output_dir {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!("Failed to create output directory {}: {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let controller = Arc::new(TileCacheController::new(config.cache.clone(), store, fetcher));

    let mut tasks = JoinSet::new();
    for url in config.urls.iter().cloned() {
        let controller = Arc::clone(&controller);
        let output_dir = config.output_dir.clone();

        tasks.spawn(async move {
            let mut response = match controller.resolve(&url).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{}: {}", url, e);
                    return false;
                }
            };

            println!("{}\t{}", response.action, url);

            let written = match output_dir {
                Some(dir) => {
                    let data = response.data.to_bytes(controller.encoder());
                    write_tile(&dir, &url, &data).await
                }
                None => true,
            };

            if let Some(Err(e)) = response.wait_for_save().await {
                warn!("{}: tile served but not cached: {}", url, e);
            }
            written
        });
    }

    let mut failures = 0usize;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(true) => {}
            Ok(false) => failures += 1,
            Err(e) => {
                error!("Tile task failed: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        error!("{} of {} tile(s) failed", failures, config.urls.len());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Write a served tile to `dir`, named after its URL.
async fn write_tile(
    dir: &Path,
    url: &str,
    data: &Result<bytes::Bytes, offline_tiles::EncodeError>,
) -> bool {
    let data = match data {
        Ok(data) => data,
        Err(e) => {
            error!("{}: cannot decode served tile: {}", url, e);
            return false;
        }
    };

    let extension = image::guess_format(data)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin");
    let path = dir.join(format!("{}.{}", urlencoding::encode(url), extension));

    match tokio::fs::write(&path, data).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to write {}: {}", path.display(), e);
            false
        }
    }
}

// =============================================================================
// Sweep Command
// =============================================================================

async fn run_sweep(config: SweepConfig) -> ExitCode {
    let Some(store) = open_store(&config.store).await else {
        return ExitCode::FAILURE;
    };

    let manager = EvictionManager::new(config.threshold, config.max_age_millis);
    match manager.try_sweep(&store, SystemClock.now_millis()).await {
        Ok(report) if report.swept => {
            info!(
                "Swept {}: {} entries, {} over age, {} removed",
                config.store.display(),
                report.entry_count,
                report.candidates,
                report.removed
            );
            ExitCode::SUCCESS
        }
        Ok(report) => {
            info!(
                "Nothing to do: {} entries, threshold {}",
                report.entry_count, config.threshold
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Sweep failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig) -> ExitCode {
    let Some(store) = open_store(&config.store).await else {
        return ExitCode::FAILURE;
    };

    match store.info().await {
        Ok(store_info) => {
            println!("store:   {}", store.path().display());
            println!("entries: {}", store_info.entry_count);
            println!("bytes:   {}", store_info.size_bytes);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to read store info: {}", e);
            ExitCode::FAILURE
        }
    }
}
