//! Freshness and outcome classification.
//!
//! Everything here is pure: given an entry, the configuration and "now",
//! it decides what the controller does. No store or network access.
//!
//! ```text
//!            store.get(key)
//!                 │
//!      ┌──────────┴───────────┐
//!   entry                  no entry / read error
//!      │                       │
//!  classify()               Miss ── offline ──▶ ServePlaceholder
//!      │                       └─── online ───▶ FetchThenSave
//!  ┌───┴────┐
//! Fresh   Stale ── offline ──▶ ServeCached
//!  │        └───── online ───▶ Revalidate
//!  ▼
//! ServeCached
//! ```

use crate::config::CacheConfig;
use crate::store::CacheEntry;

/// Whether an entry is still within its max age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Classify an entry written at `timestamp`.
///
/// Fresh iff `now - timestamp <= max_age`. A timestamp in the future (clock
/// skew) counts as age zero.
pub fn classify(timestamp: u64, now: u64, max_age: u64) -> Freshness {
    if now.saturating_sub(timestamp) <= max_age {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

/// Immutable per-request state threaded through a resolution.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub key: &'a str,
    pub config: &'a CacheConfig,
    pub now: u64,
}

impl<'a> RequestContext<'a> {
    pub fn new(key: &'a str, config: &'a CacheConfig, now: u64) -> Self {
        Self { key, config, now }
    }

    /// Freshness of `entry` under this request's clock and max age.
    pub fn freshness_of(&self, entry: &CacheEntry) -> Freshness {
        classify(entry.timestamp, self.now, self.config.max_age_millis)
    }
}

/// Result of the lookup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Entry is usable as is (fresh, or offline mode ignores its age)
    HitFresh(CacheEntry),
    /// Entry is over age and the network may be used
    HitStale(CacheEntry),
    Miss,
}

impl Lookup {
    /// Classify the outcome of a store read.
    pub fn classify(entry: Option<CacheEntry>, ctx: &RequestContext<'_>) -> Self {
        match entry {
            None => Lookup::Miss,
            Some(entry) if ctx.config.fetch_only_from_cache => Lookup::HitFresh(entry),
            Some(entry) => match ctx.freshness_of(&entry) {
                Freshness::Fresh => Lookup::HitFresh(entry),
                Freshness::Stale => Lookup::HitStale(entry),
            },
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, Lookup::Miss)
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Lookup::HitFresh(entry) | Lookup::HitStale(entry) => Some(entry),
            Lookup::Miss => None,
        }
    }
}

/// What the controller does for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheAction {
    /// Serve the stored image, no network
    ServeCached,
    /// Fetch, save and serve; serve the stored image if the fetch fails
    Revalidate,
    /// Fetch, save and serve; fetch failure goes to the caller
    FetchThenSave,
    /// Serve the empty image, no network
    ServePlaceholder,
    /// Caching is disabled: fetch and serve
    Passthrough,
}

impl CacheAction {
    /// Whether this action may hit the network.
    pub fn uses_network(self) -> bool {
        matches!(
            self,
            CacheAction::Revalidate | CacheAction::FetchThenSave | CacheAction::Passthrough
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheAction::ServeCached => "serve-cached",
            CacheAction::Revalidate => "revalidate",
            CacheAction::FetchThenSave => "fetch-then-save",
            CacheAction::ServePlaceholder => "serve-placeholder",
            CacheAction::Passthrough => "passthrough",
        }
    }
}

impl std::fmt::Display for CacheAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the action for a classified lookup.
pub fn plan(lookup: &Lookup, ctx: &RequestContext<'_>) -> CacheAction {
    if !ctx.config.enabled {
        return CacheAction::Passthrough;
    }

    match lookup {
        Lookup::HitFresh(_) => CacheAction::ServeCached,
        Lookup::HitStale(_) => CacheAction::Revalidate,
        Lookup::Miss if ctx.config.fetch_only_from_cache => CacheAction::ServePlaceholder,
        Lookup::Miss => CacheAction::FetchThenSave,
    }
}
