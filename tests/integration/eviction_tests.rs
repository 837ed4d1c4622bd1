//! Eviction integration tests.
//!
//! Tests verify:
//! - Sweeps only run once the store exceeds the entry-count threshold
//! - Only over-age entries are removed, followed by a compaction
//! - Entries rewritten after the sweep's snapshot survive it
//! - The save countdown paces eviction checks
//! - Sweep failures never reach the request

use offline_tiles::{classify, CacheAction, CacheConfig, EvictionManager, Freshness, TileStore};

use super::test_utils::{
    controller, drain_event_names, online_config, png_tile, MockFetcher, RecordingStore, NOW,
};

const MAX_AGE: u64 = 60_000;
const IMAGE: &str = "data:image/png;base64,AAAA";

fn key(i: usize) -> String {
    format!("https://tile.example.org/5/{}/7.png", i)
}

// =============================================================================
// Threshold-Gated Sweep
// =============================================================================

#[tokio::test]
async fn test_sweep_removes_only_over_age_entry() {
    let store = RecordingStore::shared();
    store.seed("e1", IMAGE, NOW - (MAX_AGE + 1)).await;
    store.seed("e2", IMAGE, NOW - (MAX_AGE - 1)).await;
    for i in 0..248 {
        store.seed(&key(i), IMAGE, NOW - 1_000).await;
    }
    assert_eq!(store.len().await, 250);

    let manager = EvictionManager::new(200, MAX_AGE);
    let report = manager.maybe_sweep(store.as_ref(), NOW).await.unwrap();

    assert!(report.swept);
    assert_eq!(report.entry_count, 250);
    assert_eq!(report.candidates, 1);
    assert_eq!(report.removed, 1);

    assert!(store.peek("e1").await.is_none());
    assert!(store.peek("e2").await.is_some());
    assert_eq!(store.len().await, 249);
    assert_eq!(store.compactions(), 1);
}

#[tokio::test]
async fn test_no_sweep_at_or_under_threshold() {
    let store = RecordingStore::shared();
    for i in 0..10 {
        store.seed(&key(i), IMAGE, NOW - 10 * MAX_AGE).await;
    }

    let manager = EvictionManager::new(10, MAX_AGE);
    let report = manager.maybe_sweep(store.as_ref(), NOW).await.unwrap();

    assert!(!report.swept);
    assert_eq!(report.entry_count, 10);
    assert_eq!(report.removed, 0);
    assert_eq!(store.len().await, 10);
    assert_eq!(store.bulk_deletes(), 0);
    assert_eq!(store.compactions(), 0);
}

#[tokio::test]
async fn test_sweep_with_nothing_over_age_still_compacts() {
    let store = RecordingStore::shared();
    for i in 0..5 {
        store.seed(&key(i), IMAGE, NOW).await;
    }

    let manager = EvictionManager::new(2, MAX_AGE);
    let report = manager.maybe_sweep(store.as_ref(), NOW).await.unwrap();

    assert!(report.swept);
    assert_eq!(report.candidates, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(store.len().await, 5);
    assert_eq!(store.compactions(), 1);
}

#[tokio::test]
async fn test_remaining_entries_are_fresh_after_sweep() {
    let store = RecordingStore::shared();
    for i in 0..300 {
        // Ages spread over [0, 3 * MAX_AGE)
        let age = (i as u64 * 7_919) % (3 * MAX_AGE);
        store.seed(&key(i), IMAGE, NOW - age).await;
    }

    let manager = EvictionManager::new(100, MAX_AGE);
    let report = manager.maybe_sweep(store.as_ref(), NOW).await.unwrap();
    assert!(report.removed > 0);

    let remaining = store.entries().await.unwrap();
    assert_eq!(remaining.len(), 300 - report.removed);
    for entry in remaining {
        assert_eq!(
            classify(entry.timestamp, NOW, MAX_AGE),
            Freshness::Fresh,
            "{} survived the sweep",
            entry.key
        );
    }
}

#[tokio::test]
async fn test_entry_rewritten_after_snapshot_survives() {
    let store = RecordingStore::shared();
    store.seed("old-a", IMAGE, NOW - 10 * MAX_AGE).await;
    store.seed("old-b", IMAGE, NOW - 10 * MAX_AGE).await;
    store.seed("fresh", IMAGE, NOW).await;

    // A save lands between the sweep reading entries and deleting them
    store.rewrite_after_snapshot("old-a", NOW);

    let manager = EvictionManager::new(0, MAX_AGE);
    let report = manager.maybe_sweep(store.as_ref(), NOW).await.unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(report.removed, 1);

    let survivor = store.peek("old-a").await.unwrap();
    assert_eq!(survivor.timestamp, NOW);
    assert!(store.peek("old-b").await.is_none());
    assert!(store.peek("fresh").await.is_some());
}

#[tokio::test]
async fn test_sweep_failure_is_swallowed() {
    let store = RecordingStore::shared();
    store.seed("old", IMAGE, NOW - 10 * MAX_AGE).await;
    store.set_fail_maintenance(true);

    let manager = EvictionManager::new(0, MAX_AGE);
    assert!(manager.maybe_sweep(store.as_ref(), NOW).await.is_none());
    assert!(manager.try_sweep(store.as_ref(), NOW).await.is_err());
    assert!(store.peek("old").await.is_some());
}

// =============================================================================
// Save-Paced Eviction
// =============================================================================

fn paced_config(every: usize) -> CacheConfig {
    CacheConfig {
        eviction_trigger_every_n_saves: every,
        eviction_entry_count_threshold: 0,
        ..online_config(MAX_AGE)
    }
}

#[tokio::test]
async fn test_every_nth_save_triggers_sweep() {
    let store = RecordingStore::shared();
    store.seed("old", IMAGE, NOW - 10 * MAX_AGE).await;

    let fetcher = MockFetcher::new();
    for i in 0..3 {
        fetcher.set_tile(&key(i), png_tile(i as u8));
    }
    let (controller, _clock) = controller(paced_config(3), &store, &fetcher);
    assert_eq!(controller.saves_until_eviction_check(), 3);

    for i in 0..2 {
        let mut response = controller.resolve(&key(i)).await.unwrap();
        response.wait_for_save().await.unwrap().unwrap();
    }
    assert_eq!(controller.saves_until_eviction_check(), 1);
    assert!(store.peek("old").await.is_some());
    assert_eq!(store.compactions(), 0);

    let mut response = controller.resolve(&key(2)).await.unwrap();
    response.wait_for_save().await.unwrap().unwrap();

    assert!(store.peek("old").await.is_none());
    assert_eq!(store.compactions(), 1);
    assert_eq!(store.len().await, 3);
    assert_eq!(controller.saves_until_eviction_check(), 3);
}

#[tokio::test]
async fn test_cached_hits_do_not_count_as_saves() {
    let store = RecordingStore::shared();
    store.seed(&key(0), IMAGE, NOW).await;
    let fetcher = MockFetcher::new();

    let (controller, _clock) = controller(paced_config(2), &store, &fetcher);
    for _ in 0..5 {
        let response = controller.resolve(&key(0)).await.unwrap();
        assert_eq!(response.action, CacheAction::ServeCached);
    }

    assert_eq!(controller.saves_until_eviction_check(), 2);
    assert_eq!(store.compactions(), 0);
}

#[tokio::test]
async fn test_failed_sweep_does_not_fail_the_save() {
    let store = RecordingStore::shared();
    store.set_fail_maintenance(true);

    let fetcher = MockFetcher::new().with_tile(&key(0), png_tile(1));
    let (controller, _clock) = controller(paced_config(1), &store, &fetcher);
    let mut events = controller.subscribe();

    let mut response = controller.resolve(&key(0)).await.unwrap();
    let revision = response.wait_for_save().await.unwrap().unwrap();

    assert_eq!(store.peek(&key(0)).await.unwrap().revision, revision);
    assert_eq!(drain_event_names(&mut events), vec!["cache-miss"]);
}

#[tokio::test]
async fn test_sweep_uses_controller_clock() {
    let store = RecordingStore::shared();
    let fetcher = MockFetcher::new();
    fetcher.set_tile(&key(0), png_tile(0));
    fetcher.set_tile(&key(1), png_tile(1));

    let (controller, clock) = controller(paced_config(2), &store, &fetcher);

    let mut first = controller.resolve(&key(0)).await.unwrap();
    first.wait_for_save().await.unwrap().unwrap();

    // The first tile ages out before the second save triggers the sweep
    clock.advance(MAX_AGE + 1);
    let mut second = controller.resolve(&key(1)).await.unwrap();
    second.wait_for_save().await.unwrap().unwrap();

    assert!(store.peek(&key(0)).await.is_none());
    assert_eq!(
        store.peek(&key(1)).await.unwrap().timestamp,
        NOW + MAX_AGE + 1
    );
}
