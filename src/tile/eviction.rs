//! Bulk eviction of over-age tiles.
//!
//! Eviction is driven by saves, not by a timer: every Nth completed save asks
//! the [`EvictionManager`] to check the store. The check is one `info()` call
//! in the common case; only a store holding more entries than the threshold
//! is swept.
//!
//! # Sweep
//!
//! 1. `info()`: stop if `entry_count <= threshold`
//! 2. `entries()`: snapshot every entry at time T
//! 3. select entries with `T - timestamp > max_age`
//! 4. `bulk_delete()` the selection, then `compact()`
//!
//! Deletes carry the revision seen in the snapshot, so an entry rewritten
//! while the sweep runs is not removed by it.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::store::{DeleteTarget, TileStore};

use super::policy::{classify, Freshness};

// =============================================================================
// Eviction Counter
// =============================================================================

/// Countdown of saves until the next eviction check.
///
/// Not persisted: a restart starts a fresh countdown.
#[derive(Debug)]
pub struct EvictionCounter {
    every: usize,
    remaining: AtomicUsize,
}

impl EvictionCounter {
    /// Create a counter firing every `every` saves (at least 1).
    pub fn new(every: usize) -> Self {
        let every = every.max(1);
        Self {
            every,
            remaining: AtomicUsize::new(every),
        }
    }

    /// Record one completed save.
    ///
    /// Returns `true` when this save brought the countdown to zero; the
    /// counter is reset in the same step.
    pub fn record_save(&self) -> bool {
        let every = self.every;
        let previous = match self.remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            Some(if n <= 1 { every } else { n - 1 })
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        previous <= 1
    }

    /// Saves left before the next check.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn every(&self) -> usize {
        self.every
    }
}

// =============================================================================
// Sweep Report
// =============================================================================

/// What a sweep saw and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entry count reported before the sweep
    pub entry_count: usize,

    /// Whether the count exceeded the threshold and a sweep ran
    pub swept: bool,

    /// Entries selected as over age
    pub candidates: usize,

    /// Entries actually removed
    pub removed: usize,
}

// =============================================================================
// Eviction Manager
// =============================================================================

/// Removes over-age entries once a store grows past a threshold.
#[derive(Debug, Clone)]
pub struct EvictionManager {
    entry_count_threshold: usize,
    max_age_millis: u64,
    size_budget_bytes: Option<u64>,
    estimated_capacity: Option<usize>,
}

impl EvictionManager {
    pub fn new(entry_count_threshold: usize, max_age_millis: u64) -> Self {
        Self {
            entry_count_threshold,
            max_age_millis,
            size_budget_bytes: None,
            estimated_capacity: None,
        }
    }

    /// Build a manager from the cache configuration, including its advisory
    /// size budget.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            estimated_capacity: Some(config.estimated_entry_capacity()),
            ..Self::new(config.eviction_entry_count_threshold, config.max_age_millis)
                .with_size_budget(config.size_budget_bytes())
        }
    }

    /// Warn when the store is still above `bytes` after a sweep.
    pub fn with_size_budget(mut self, bytes: u64) -> Self {
        self.size_budget_bytes = Some(bytes);
        self
    }

    pub fn entry_count_threshold(&self) -> usize {
        self.entry_count_threshold
    }

    pub fn max_age_millis(&self) -> u64 {
        self.max_age_millis
    }

    /// Sweep if needed, logging and swallowing any failure.
    ///
    /// Returns `None` if the sweep failed part way.
    pub async fn maybe_sweep<S: TileStore>(&self, store: &S, now: u64) -> Option<SweepReport> {
        match self.try_sweep(store, now).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Tile eviction sweep failed");
                None
            }
        }
    }

    /// Sweep if needed, returning the first store error encountered.
    pub async fn try_sweep<S: TileStore>(&self, store: &S, now: u64) -> Result<SweepReport, StoreError> {
        let store_info = store.info().await?;
        let mut report = SweepReport {
            entry_count: store_info.entry_count,
            ..SweepReport::default()
        };

        if store_info.entry_count <= self.entry_count_threshold {
            debug!(
                entries = store_info.entry_count,
                threshold = self.entry_count_threshold,
                "Tile store under eviction threshold"
            );
            return Ok(report);
        }
        report.swept = true;

        let targets: Vec<DeleteTarget> = store
            .entries()
            .await?
            .iter()
            .filter(|entry| classify(entry.timestamp, now, self.max_age_millis) == Freshness::Stale)
            .map(DeleteTarget::from)
            .collect();
        report.candidates = targets.len();

        report.removed = store.bulk_delete(&targets).await?;
        store.compact().await?;

        info!(
            entries = store_info.entry_count,
            candidates = report.candidates,
            removed = report.removed,
            "Tile eviction sweep complete"
        );

        if let Some(budget) = self.size_budget_bytes {
            let after = store.info().await?;
            if after.size_bytes > budget {
                warn!(
                    size_bytes = after.size_bytes,
                    budget_bytes = budget,
                    entries = after.entry_count,
                    estimated_capacity = ?self.estimated_capacity,
                    "Tile store is over its size budget after eviction"
                );
            }
        }

        Ok(report)
    }
}
