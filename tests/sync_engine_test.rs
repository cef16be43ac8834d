//! End-to-end behaviour of the sync engine over in-memory tiers

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use profile_sync::cache::ProfileL2;
use profile_sync::db::{ProfileStore, SqliteProfileStore, SyncStateStore};
use profile_sync::services::{OwnershipConfig, ProfileReader, RetryCycleStats, SynchronizerConfig};
use profile_sync::types::{now_millis, FailedProfileFetch, ProfileDeployment, SyncState};

use common::{event, eventually, profile, profile_with_items, snapshot, ControlledStore, Engine};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn deployment(entity_id: &str, pointer: &str, timestamp: i64) -> ProfileDeployment {
    ProfileDeployment {
        entity_id: entity_id.to_string(),
        pointer: pointer.to_string(),
        timestamp,
        auth_chain: None,
    }
}

// =============================================================================
// Persister
// =============================================================================

#[tokio::test]
async fn test_older_deployment_never_replaces_newer() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();

    engine.persister.persist_entity(profile("A", "0xabc", 1000)).await;
    engine.persister.persist_entity(profile("B", "0xabc", 500)).await;
    engine.persister.wait_for_drain().await;

    assert_eq!(engine.hot.get("0xabc").unwrap().id, "A");
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "A");

    // Same outcome with the arrival order reversed
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine.persister.persist_entity(profile("B", "0xabc", 500)).await;
    engine.persister.persist_entity(profile("A", "0xabc", 1000)).await;
    engine.persister.wait_for_drain().await;

    assert_eq!(engine.hot.get("0xabc").unwrap().id, "A");
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "A");
}

#[tokio::test]
async fn test_mixed_case_pointers_collapse_to_one_entry() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();

    engine.persister.persist_entity(profile("A", "0xABC", 1000)).await;
    engine.persister.persist_entity(profile("B", "0xabc", 2000)).await;

    assert_eq!(engine.hot.len(), 1);
    assert_eq!(engine.hot.get("0xAbC").unwrap().id, "B");
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "B");
}

#[tokio::test]
async fn test_duplicate_entity_is_written_once() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();

    let entity = profile("A", "0xabc", 1000);
    engine.persister.persist_entity(entity.clone()).await;
    engine.persister.persist_entity(entity).await;
    engine.persister.wait_for_drain().await;

    let stats = engine.persister.stats();
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.direct_writes, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(engine.store.profile_count().unwrap(), 1);
    assert!(engine.persister.has_been_processed("A"));
}

#[tokio::test]
async fn test_bootstrap_writes_are_flushed_by_drain() {
    let engine = Engine::new();
    for i in 0..50 {
        engine
            .persister
            .persist_entity(profile(&format!("e{}", i), &format!("0x{}", i), 1000 + i))
            .await;
    }
    engine.persister.wait_for_drain().await;

    assert_eq!(engine.store.profile_count().unwrap(), 50);
    assert_eq!(engine.persister.stats().queued, 50);
    assert_eq!(engine.persister.stats().direct_writes, 0);
}

#[tokio::test]
async fn test_failed_direct_write_falls_back_to_queue() {
    let store = Arc::new(SqliteProfileStore::open_in_memory().unwrap());
    // Both inline attempts fail; the queued write goes through
    let flaky = Arc::new(ControlledStore::new(Arc::clone(&store)).with_failing_writes(2));
    let engine = Engine::with_store(store, flaky);
    engine.persister.set_bootstrap_complete();

    engine.persister.persist_entity(profile("a", "0x1", 1000)).await;

    let stats = engine.persister.stats();
    assert_eq!(stats.direct_writes, 0);
    assert_eq!(stats.direct_failures, 1);
    assert_eq!(stats.queued, 1);
    assert_eq!(engine.hot.get("0x1").unwrap().id, "a");

    engine.persister.wait_for_drain().await;
    assert_eq!(engine.stored("0x1").await.unwrap().id, "a");
    assert_eq!(engine.persister.stats().queue.written, 1);
}

#[tokio::test]
async fn test_persist_invalidates_stale_l2_entry() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine.l2.set_profiles(&[profile("old", "0xabc", 1)]).await;

    engine.persister.persist_entity(profile("new", "0xabc", 2)).await;

    assert!(engine.l2.get_profiles(&["0xabc".to_string()]).await.is_empty());
}

// =============================================================================
// Sanitizer and failed-fetch ledger
// =============================================================================

#[tokio::test]
async fn test_missing_entities_land_in_ledger() {
    let engine = Engine::new();
    engine.network.publish(profile("e1", "0x1", 100));
    engine.network.publish(profile("e2", "0x2", 100));

    let deployments = vec![
        deployment("e1", "0x1", 100),
        deployment("e2", "0x2", 100),
        deployment("e3", "0x3", 100),
        deployment("e3", "0x3", 100),
    ];
    let entities = engine
        .sanitizer
        .sanitize_profiles(&deployments, engine.recorder.as_ref())
        .await;

    assert_eq!(entities.len(), 2);
    assert_eq!(engine.network.entity_calls.load(Ordering::SeqCst), 1);

    let ledger = engine.store.get_failed_profile_fetches(10, 5).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].entity_id, "e3");
    assert_eq!(ledger[0].pointer, "0x3");
    assert_eq!(ledger[0].retry_count, 0);
}

#[tokio::test]
async fn test_superseded_failed_fetch_is_dropped() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine.persister.persist_entity(profile("current", "0xabc", 2000)).await;

    let row = FailedProfileFetch::new(&deployment("older", "0xabc", 1500), None);
    engine.store.insert_failed_profile_fetch(&row).await.unwrap();

    let sync = engine.synchronizer(Engine::sync_config());
    let stats = sync.retry_failed_fetches().await;

    assert_eq!(
        stats,
        RetryCycleStats {
            succeeded: 0,
            skipped: 1,
            failed: 0
        }
    );
    assert!(engine.store.get_failed_profile_fetches(10, 5).await.unwrap().is_empty());
    assert_eq!(engine.network.entity_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "current");
}

#[tokio::test]
async fn test_superseded_check_reads_durable_store() {
    let engine = Engine::new();
    engine
        .store
        .upsert_profile_if_newer(&profile("current", "0xabc", 2000))
        .await
        .unwrap();
    let row = FailedProfileFetch::new(&deployment("older", "0xabc", 1500), None);
    engine.store.insert_failed_profile_fetch(&row).await.unwrap();

    let stats = engine
        .synchronizer(Engine::sync_config())
        .retry_failed_fetches()
        .await;
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn test_failed_fetch_converges_once_network_has_entity() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    let sync = engine.synchronizer(Engine::sync_config());

    let deployments = vec![deployment("late", "0xabc", 1000)];
    let entities = engine
        .sanitizer
        .sanitize_profiles(&deployments, engine.recorder.as_ref())
        .await;
    assert!(entities.is_empty());

    // Still missing upstream: retry count grows, row stays
    let stats = sync.retry_failed_fetches().await;
    assert_eq!(stats.failed, 1);
    let ledger = engine.store.get_failed_profile_fetches(10, 5).await.unwrap();
    assert_eq!(ledger[0].retry_count, 1);
    assert!(ledger[0].last_retry_at.is_some());

    engine.network.publish(profile("late", "0xabc", 1000));
    let stats = sync.retry_failed_fetches().await;
    assert_eq!(stats.succeeded, 1);

    engine.persister.wait_for_drain().await;
    assert!(engine.store.get_failed_profile_fetches(10, 5).await.unwrap().is_empty());
    assert_eq!(engine.hot.get("0xabc").unwrap().id, "late");
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "late");
}

#[tokio::test]
async fn test_failed_fetch_stops_at_retry_cap() {
    let engine = Engine::new();
    let sync = engine.synchronizer(SynchronizerConfig {
        max_failed_fetch_retries: 2,
        ..Engine::sync_config()
    });

    let row = FailedProfileFetch::new(&deployment("gone", "0xabc", 1000), None);
    engine.store.insert_failed_profile_fetch(&row).await.unwrap();

    assert_eq!(sync.retry_failed_fetches().await.failed, 1);
    assert_eq!(sync.retry_failed_fetches().await.failed, 1);
    assert_eq!(sync.retry_failed_fetches().await, RetryCycleStats::default());

    // Retained for inspection
    let rows = engine.store.get_failed_profile_fetches(10, 100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].retry_count, 2);
}

// =============================================================================
// Synchronizer
// =============================================================================

#[tokio::test]
async fn test_resolve_cursor_prefers_persisted_state() {
    let engine = Engine::new();
    let sync = engine.synchronizer(Engine::sync_config());

    assert_eq!(sync.resolve_cursor().await, (Engine::sync_config().genesis_timestamp, false));

    engine
        .store
        .upsert_profile_if_newer(&profile("e", "0x1", 1_650_000_000_000))
        .await
        .unwrap();
    assert_eq!(sync.resolve_cursor().await, (1_650_000_000_000, false));

    engine
        .store
        .save(&SyncState {
            bootstrap_complete: true,
            last_pointer_changes_check: 1_660_000_000_000,
        })
        .await
        .unwrap();
    assert_eq!(sync.resolve_cursor().await, (1_660_000_000_000, true));
}

#[tokio::test]
async fn test_old_cursor_bootstraps_from_snapshots() {
    let engine = Engine::new();
    let now = now_millis();
    let snapshot_end = now - 8 * DAY_MS;

    engine.network.add_snapshot(
        snapshot("snap-1", Engine::sync_config().genesis_timestamp, snapshot_end),
        vec![event("s1", "0xaaa", snapshot_end - 10, snapshot_end - 10)],
    );
    engine.network.publish(profile("s1", "0xaaa", snapshot_end - 10));
    engine.network.push_change(event("p1", "0xbbb", now - DAY_MS, now - DAY_MS));
    engine.network.publish(profile("p1", "0xbbb", now - DAY_MS));

    let sync = Arc::new(engine.synchronizer(Engine::sync_config()));
    let handle = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run().await })
    };

    let persister = Arc::clone(&engine.persister);
    assert!(eventually(|| persister.is_bootstrap_complete()).await);
    engine.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(engine.network.snapshot_list_calls.load(Ordering::SeqCst), 1);
    assert!(engine.store.is_snapshot_processed("snap-1").await.unwrap());
    assert_eq!(engine.stored("0xaaa").await.unwrap().id, "s1");
    assert_eq!(engine.stored("0xbbb").await.unwrap().id, "p1");
    assert_eq!(sync.cursor(), now - DAY_MS);

    let state = engine.store.load().await.unwrap().unwrap();
    assert!(state.bootstrap_complete);
    assert_eq!(state.last_pointer_changes_check, now - DAY_MS);
}

#[tokio::test]
async fn test_recent_cursor_skips_snapshots() {
    let engine = Engine::new();
    let now = now_millis();
    engine
        .store
        .save(&SyncState {
            bootstrap_complete: false,
            last_pointer_changes_check: now - DAY_MS,
        })
        .await
        .unwrap();
    engine.network.push_change(event("p1", "0xbbb", now - 1000, now - 1000));
    engine.network.publish(profile("p1", "0xbbb", now - 1000));

    let sync = Arc::new(engine.synchronizer(Engine::sync_config()));
    let handle = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run().await })
    };

    let persister = Arc::clone(&engine.persister);
    assert!(eventually(|| persister.is_bootstrap_complete()).await);
    engine.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(engine.network.snapshot_list_calls.load(Ordering::SeqCst), 0);
    assert!(engine.network.pointer_changes_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(engine.stored("0xbbb").await.unwrap().id, "p1");
}

#[tokio::test]
async fn test_snapshot_rerun_is_skipped() {
    let engine = Engine::new();
    let now = now_millis();
    let end = now - 10 * DAY_MS;
    engine.network.add_snapshot(
        snapshot("snap-1", Engine::sync_config().genesis_timestamp, end),
        vec![event("s1", "0xaaa", end - 10, end - 10)],
    );
    engine.network.publish(profile("s1", "0xaaa", end - 10));
    engine.store.mark_snapshot_processed("snap-1").await.unwrap();

    let sync = Arc::new(engine.synchronizer(Engine::sync_config()));
    let handle = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run().await })
    };
    let persister = Arc::clone(&engine.persister);
    assert!(eventually(|| persister.is_bootstrap_complete()).await);
    engine.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(engine.network.entity_calls.load(Ordering::SeqCst), 0);
    assert!(engine.stored("0xaaa").await.is_none());
    assert!(sync.cursor() >= end);
}

#[tokio::test]
async fn test_snapshot_marked_processed_only_after_profiles_are_durable() {
    let store = Arc::new(SqliteProfileStore::open_in_memory().unwrap());
    let slow = Arc::new(
        ControlledStore::new(Arc::clone(&store)).with_write_delay(Duration::from_millis(50)),
    );
    let engine = Engine::with_store(store, slow.clone());
    let genesis = Engine::sync_config().genesis_timestamp;
    let end = now_millis() - 10 * DAY_MS;

    engine.network.add_snapshot(
        snapshot("snap-1", genesis, end),
        vec![
            event("s1", "0xaaa", end - 20, end - 20),
            event("s2", "0xbbb", end - 10, end - 10),
        ],
    );
    engine.network.publish(profile("s1", "0xaaa", end - 20));
    engine.network.publish(profile("s2", "0xbbb", end - 10));

    assert_eq!(engine.snapshots().sync_profiles(genesis).await, end);

    // Writes were queued (bootstrap), yet both rows existed when the mark landed
    assert_eq!(slow.profiles_at_mark(), vec![2]);
    assert!(engine.store.is_snapshot_processed("snap-1").await.unwrap());
    assert_eq!(engine.persister.stats().queued, 2);
}

#[tokio::test]
async fn test_exhausted_bootstrap_forces_completion_at_current_time() {
    let engine = Engine::new();
    let start = now_millis();
    engine
        .store
        .save(&SyncState {
            bootstrap_complete: false,
            last_pointer_changes_check: start - DAY_MS,
        })
        .await
        .unwrap();
    engine.network.pointer_changes_down.store(true, Ordering::SeqCst);

    let config = SynchronizerConfig {
        bootstrap_attempts: 2,
        ..Engine::sync_config()
    };
    let sync = Arc::new(engine.synchronizer(config));
    let handle = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run().await })
    };

    let persister = Arc::clone(&engine.persister);
    assert!(eventually(|| persister.is_bootstrap_complete()).await);
    engine.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(engine.network.pointer_changes_calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(engine.network.snapshot_list_calls.load(Ordering::SeqCst), 0);
    assert!(sync.cursor() >= start);

    let state = engine.store.load().await.unwrap().unwrap();
    assert!(state.bootstrap_complete);
    assert!(state.last_pointer_changes_check >= start);
}

#[tokio::test]
async fn test_poll_once_applies_new_changes_and_saves_cursor() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    let config = SynchronizerConfig {
        genesis_timestamp: 1000,
        ..Engine::sync_config()
    };
    let sync = engine.synchronizer(config);

    engine.network.push_change(event("a", "0x1", 1500, 2000));
    engine.network.push_change(event("b", "0x2", 2500, 3000));
    engine.network.publish(profile("a", "0x1", 1500));
    // "b" is not resolvable yet and goes to the ledger

    assert_eq!(sync.poll_once().await, 1);
    assert_eq!(sync.cursor(), 3000);
    assert_eq!(engine.stored("0x1").await.unwrap().id, "a");
    assert_eq!(
        engine.store.load().await.unwrap().unwrap().last_pointer_changes_check,
        3000
    );

    let ledger = engine.store.get_failed_profile_fetches(10, 5).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].entity_id, "b");

    // Reopening at the cursor replays "b"; the retry loop owns it now
    let calls = engine.network.entity_calls.load(Ordering::SeqCst);
    engine.network.publish(profile("b", "0x2", 2500));
    assert_eq!(sync.poll_once().await, 0);
    assert_eq!(engine.network.entity_calls.load(Ordering::SeqCst), calls);

    let stats = sync.retry_failed_fetches().await;
    assert_eq!(stats.succeeded, 1);
    assert_eq!(engine.stored("0x2").await.unwrap().id, "b");
    assert_eq!(sync.poll_once().await, 0);
}

#[tokio::test]
async fn test_repeated_polls_leave_failed_fetch_to_retry_loop() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    let config = SynchronizerConfig {
        genesis_timestamp: 1000,
        ..Engine::sync_config()
    };
    let sync = engine.synchronizer(config);
    engine.network.push_change(event("b", "0x2", 2500, 3000));

    assert_eq!(sync.poll_once().await, 0);
    let calls = engine.network.entity_calls.load(Ordering::SeqCst);
    let before = engine.store.get_failed_profile_fetches(10, 5).await.unwrap();
    assert_eq!(before.len(), 1);

    for _ in 0..3 {
        assert_eq!(sync.poll_once().await, 0);
    }

    assert_eq!(engine.network.entity_calls.load(Ordering::SeqCst), calls);
    let after = engine.store.get_failed_profile_fetches(10, 5).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].retry_count, before[0].retry_count);
    assert_eq!(after[0].error_message, before[0].error_message);
    assert_eq!(sync.cursor(), 3000);
}

#[tokio::test]
async fn test_stop_drains_and_saves_state() {
    let engine = Engine::new();
    let sync = engine.synchronizer(Engine::sync_config());

    engine.persister.persist_entity(profile("a", "0x1", 10)).await;
    sync.stop().await;

    assert!(!engine.shutdown.is_running());
    assert_eq!(engine.stored("0x1").await.unwrap().id, "a");
    let state = engine.store.load().await.unwrap().unwrap();
    assert_eq!(state.last_pointer_changes_check, sync.cursor());
}

// =============================================================================
// Ownership validator
// =============================================================================

#[tokio::test]
async fn test_validator_applies_fewer_wearables() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine
        .persister
        .persist_entity(profile_with_items("A", "0xabc", 1000, 3, 0))
        .await;
    engine.l2.set_profiles(&[profile_with_items("A", "0xabc", 1000, 3, 0)]).await;

    engine
        .network
        .set_canonical(profile_with_items("A", "0xabc", 1000, 2, 0));

    let stats = engine.validator().validate_all().await;
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.updated, 1);

    assert_eq!(engine.hot.get("0xabc").unwrap().wearable_count(), 2);
    assert_eq!(engine.stored("0xabc").await.unwrap().wearable_count(), 2);
    assert!(engine.l2.get_profiles(&["0xabc".to_string()]).await.is_empty());
}

#[tokio::test]
async fn test_validator_ignores_older_canonical() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine.persister.persist_entity(profile("B", "0xabc", 2000)).await;
    engine.network.set_canonical(profile("A", "0xabc", 1000));

    let stats = engine.validator().validate_all().await;
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(engine.hot.get("0xabc").unwrap().id, "B");
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "B");
}

#[tokio::test]
async fn test_validator_adopts_newer_canonical() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine.persister.persist_entity(profile("A", "0xabc", 1000)).await;
    engine.network.set_canonical(profile("B", "0xabc", 2000));

    let stats = engine.validator().validate_all().await;
    assert_eq!(stats.updated, 1);
    assert_eq!(engine.hot.get("0xabc").unwrap().id, "B");
    assert_eq!(engine.stored("0xabc").await.unwrap().id, "B");
}

#[tokio::test]
async fn test_failed_validator_batch_does_not_stop_cycle() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    for (id, pointer) in [("A", "0x1"), ("B", "0x2")] {
        engine
            .persister
            .persist_entity(profile_with_items(id, pointer, 1000, 3, 0))
            .await;
        engine
            .network
            .set_canonical(profile_with_items(id, pointer, 1000, 2, 0));
    }
    engine.network.failing_canonical_calls.store(1, Ordering::SeqCst);

    let validator = engine.validator_with(OwnershipConfig {
        initial_delay: Duration::from_millis(1),
        batch_size: 1,
        batch_delay: Duration::from_millis(1),
        ..OwnershipConfig::default()
    });
    let stats = validator.validate_all().await;

    assert_eq!(stats.batch_failures, 1);
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.updated, 1);
    let corrected = ["0x1", "0x2"]
        .iter()
        .filter(|p| engine.hot.get(p).unwrap().wearable_count() == 2)
        .count();
    assert_eq!(corrected, 1);
}

#[tokio::test]
async fn test_validator_stop_ends_run() {
    let engine = Engine::new();
    let validator = Arc::new(engine.validator_with(OwnershipConfig {
        initial_delay: Duration::from_secs(3600),
        ..OwnershipConfig::default()
    }));
    let handle = Arc::clone(&validator).spawn();

    validator.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(!engine.shutdown.is_running());
}

// =============================================================================
// Read path
// =============================================================================

#[tokio::test]
async fn test_reader_serves_from_durable_store_after_restart() {
    let engine = Engine::new();
    engine.persister.set_bootstrap_complete();
    engine.persister.persist_entity(profile("A", "0xabc", 1000)).await;

    // Fresh process: empty L1 and L2 over the same durable store
    let hot = Arc::new(profile_sync::cache::HotProfileCache::with_defaults());
    let l2 = ProfileL2::new(Arc::new(profile_sync::cache::MemoryDistributedCache::default()));
    let reader = ProfileReader::new(
        Arc::clone(&hot),
        l2.clone(),
        engine.store.clone() as Arc<dyn ProfileStore>,
    );

    let found = reader.get_profile("0xABC").await.unwrap().unwrap();
    assert_eq!(found.id, "A");
    assert!(hot.has("0xabc"));
    assert_eq!(l2.get_profiles(&["0xabc".to_string()]).await.len(), 1);
}
