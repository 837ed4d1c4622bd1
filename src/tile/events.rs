//! Cache observability events.
//!
//! The controller publishes a [`CacheEvent`] for every lookup and for every
//! failed save on a `tokio::sync::broadcast` channel. Hosts subscribe with
//! [`TileCacheController::subscribe`](super::TileCacheController::subscribe);
//! publishing never blocks and events are dropped when nobody listens.

use crate::error::CacheError;

/// Capacity of the event channel. Slow subscribers see `Lagged` past this.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A lookup found an entry, fresh or stale
    Hit { key: String },

    /// A lookup found nothing (or the store read failed)
    Miss { key: String },

    /// Saving a fetched tile failed
    Error { key: String, error: CacheError },
}

impl CacheEvent {
    /// Event name as seen by hosts.
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "cache-hit",
            CacheEvent::Miss { .. } => "cache-miss",
            CacheEvent::Error { .. } => "cache-error",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Hit { key } | CacheEvent::Miss { key } | CacheEvent::Error { key, .. } => {
                key
            }
        }
    }
}
