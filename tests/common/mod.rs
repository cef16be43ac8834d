//! Shared fixtures: a scripted content network and an in-memory engine

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use profile_sync::cache::{HotProfileCache, MemoryDistributedCache, ProfileL2};
use profile_sync::db::{ProfileStore, SqliteProfileStore, SyncStateStore};
use profile_sync::network::{ContentClient, DeploymentStream, RetryPolicy};
use profile_sync::services::{
    EntityPersister, FailedFetchRecorder, NotFoundHandler, OwnershipConfig,
    OwnershipValidatorJob, ProfileSanitizer, SanitizerConfig, SnapshotsConfig, SnapshotsHandler,
    Synchronizer, SynchronizerConfig,
};
use profile_sync::shutdown::Shutdown;
use profile_sync::tracker::{DeploymentTracker, TrackerConfig};
use profile_sync::types::{
    DeploymentEvent, FailedProfileFetch, ProfileEntity, Result, SnapshotMetadata, SyncError,
    TimeRange, PROFILE_ENTITY_TYPE,
};
use profile_sync::worker::WriteQueueConfig;

pub fn profile(id: &str, pointer: &str, timestamp: i64) -> ProfileEntity {
    profile_with_items(id, pointer, timestamp, 0, 0)
}

pub fn profile_with_items(
    id: &str,
    pointer: &str,
    timestamp: i64,
    wearables: usize,
    emotes: usize,
) -> ProfileEntity {
    let wearables: Vec<String> = (0..wearables).map(|i| format!("urn:wearable:{}", i)).collect();
    let emotes: Vec<String> = (0..emotes).map(|i| format!("urn:emote:{}", i)).collect();
    ProfileEntity {
        id: id.to_string(),
        pointers: vec![pointer.to_string()],
        timestamp,
        content: vec![],
        metadata: json!({
            "avatars": [{"name": id, "avatar": {"wearables": wearables, "emotes": emotes}}]
        }),
    }
}

pub fn event(entity_id: &str, pointer: &str, entity_timestamp: i64, local_timestamp: i64) -> DeploymentEvent {
    DeploymentEvent {
        entity_id: entity_id.to_string(),
        entity_type: PROFILE_ENTITY_TYPE.to_string(),
        pointers: vec![pointer.to_string()],
        entity_timestamp,
        local_timestamp,
        auth_chain: None,
    }
}

pub fn snapshot(hash: &str, init: i64, end: i64) -> SnapshotMetadata {
    SnapshotMetadata {
        hash: hash.to_string(),
        time_range: TimeRange {
            init_timestamp: init,
            end_timestamp: end,
        },
        number_of_entities: None,
        replaced_snapshot_hashes: vec![],
    }
}

/// Content network whose answers are set up by the test
#[derive(Default)]
pub struct MockNetwork {
    entities: Mutex<HashMap<String, ProfileEntity>>,
    canonical: Mutex<HashMap<String, ProfileEntity>>,
    changes: Mutex<Vec<DeploymentEvent>>,
    snapshots: Mutex<Vec<(SnapshotMetadata, Vec<DeploymentEvent>)>>,
    pub entity_calls: AtomicU32,
    pub snapshot_list_calls: AtomicU32,
    pub pointer_changes_calls: AtomicU32,
    /// Every pointer-changes stream fails while set
    pub pointer_changes_down: AtomicBool,
    /// Number of upcoming canonical lookups that fail
    pub failing_canonical_calls: AtomicU32,
}

impl MockNetwork {
    /// Make `entity` resolvable by id
    pub fn publish(&self, entity: ProfileEntity) {
        self.entities
            .lock()
            .unwrap()
            .insert(entity.id.clone(), entity);
    }

    /// Canonical profile returned for its pointer
    pub fn set_canonical(&self, entity: ProfileEntity) {
        let pointer = entity.pointer().unwrap();
        self.canonical.lock().unwrap().insert(pointer, entity);
    }

    pub fn push_change(&self, event: DeploymentEvent) {
        let mut changes = self.changes.lock().unwrap();
        changes.push(event);
        changes.sort_by_key(|e| e.local_timestamp);
    }

    pub fn add_snapshot(&self, metadata: SnapshotMetadata, events: Vec<DeploymentEvent>) {
        self.snapshots.lock().unwrap().push((metadata, events));
    }
}

#[async_trait]
impl ContentClient for MockNetwork {
    async fn get_entities_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileEntity>> {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        let entities = self.entities.lock().unwrap();
        Ok(ids.iter().filter_map(|id| entities.get(id).cloned()).collect())
    }

    async fn get_sanitized_profiles(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>> {
        if take_one(&self.failing_canonical_calls) {
            return Err(SyncError::Network("lambdas unavailable".into()));
        }
        let canonical = self.canonical.lock().unwrap();
        Ok(pointers
            .iter()
            .filter_map(|p| canonical.get(p).cloned())
            .collect())
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        self.snapshot_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(metadata, _)| metadata.clone())
            .collect())
    }

    fn snapshot_deployments(&self, snapshot: &SnapshotMetadata) -> DeploymentStream {
        let events: Vec<DeploymentEvent> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .find(|(metadata, _)| metadata.hash == snapshot.hash)
            .map(|(_, events)| events.clone())
            .unwrap_or_default();
        futures::stream::iter(events.into_iter().map(Ok)).boxed()
    }

    fn pointer_changes(&self, from: i64) -> DeploymentStream {
        self.pointer_changes_calls.fetch_add(1, Ordering::SeqCst);
        if self.pointer_changes_down.load(Ordering::SeqCst) {
            return futures::stream::iter(vec![Err::<DeploymentEvent, _>(SyncError::Network(
                "pointer-changes unavailable".into(),
            ))])
            .boxed();
        }
        let events: Vec<DeploymentEvent> = self
            .changes
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.local_timestamp >= from)
            .cloned()
            .collect();
        futures::stream::iter(events.into_iter().map(Ok)).boxed()
    }
}

/// Decrement `counter` if positive; true when a unit was taken
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Durable store wrapper with slow or failing profile writes
pub struct ControlledStore {
    inner: Arc<SqliteProfileStore>,
    write_delay: Duration,
    failing_writes: AtomicU32,
    profiles_at_mark: Mutex<Vec<u64>>,
}

impl ControlledStore {
    pub fn new(inner: Arc<SqliteProfileStore>) -> Self {
        Self {
            inner,
            write_delay: Duration::ZERO,
            failing_writes: AtomicU32::new(0),
            profiles_at_mark: Mutex::new(Vec::new()),
        }
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Fail the next `count` profile writes
    pub fn with_failing_writes(self, count: u32) -> Self {
        self.failing_writes.store(count, Ordering::SeqCst);
        self
    }

    /// Stored profile count observed each time a snapshot was marked processed
    pub fn profiles_at_mark(&self) -> Vec<u64> {
        self.profiles_at_mark.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileStore for ControlledStore {
    async fn upsert_profile_if_newer(&self, entity: &ProfileEntity) -> Result<bool> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        if take_one(&self.failing_writes) {
            return Err(SyncError::Database("database is locked".into()));
        }
        self.inner.upsert_profile_if_newer(entity).await
    }

    async fn upsert_profile_correction(&self, entity: &ProfileEntity) -> Result<bool> {
        self.inner.upsert_profile_correction(entity).await
    }

    async fn get_profiles_by_pointers(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>> {
        self.inner.get_profiles_by_pointers(pointers).await
    }

    async fn get_latest_profile_timestamp(&self) -> Result<Option<i64>> {
        self.inner.get_latest_profile_timestamp().await
    }

    async fn insert_failed_profile_fetch(&self, fetch: &FailedProfileFetch) -> Result<()> {
        self.inner.insert_failed_profile_fetch(fetch).await
    }

    async fn get_failed_profile_fetches(
        &self,
        limit: usize,
        max_retry_count: u32,
    ) -> Result<Vec<FailedProfileFetch>> {
        self.inner.get_failed_profile_fetches(limit, max_retry_count).await
    }

    async fn delete_failed_profile_fetch(&self, entity_id: &str) -> Result<()> {
        self.inner.delete_failed_profile_fetch(entity_id).await
    }

    async fn has_failed_profile_fetch(&self, entity_id: &str) -> Result<bool> {
        self.inner.has_failed_profile_fetch(entity_id).await
    }

    async fn update_failed_profile_fetch_retry(
        &self,
        entity_id: &str,
        error_message: &str,
    ) -> Result<()> {
        self.inner
            .update_failed_profile_fetch_retry(entity_id, error_message)
            .await
    }

    async fn mark_snapshot_processed(&self, hash: &str) -> Result<()> {
        let count = self.inner.profile_count()?;
        self.profiles_at_mark.lock().unwrap().push(count);
        self.inner.mark_snapshot_processed(hash).await
    }

    async fn is_snapshot_processed(&self, hash: &str) -> Result<bool> {
        self.inner.is_snapshot_processed(hash).await
    }
}

/// Fully wired engine over the mock network and in-memory tiers
pub struct Engine {
    pub network: Arc<MockNetwork>,
    pub store: Arc<SqliteProfileStore>,
    /// Store the engine's components write through; `store` unless wrapped
    pub durable: Arc<dyn ProfileStore>,
    pub hot: Arc<HotProfileCache>,
    pub l2: ProfileL2,
    pub persister: Arc<EntityPersister>,
    pub sanitizer: Arc<ProfileSanitizer>,
    pub recorder: Arc<dyn NotFoundHandler>,
    pub shutdown: Shutdown,
}

impl Engine {
    pub fn new() -> Self {
        let store = Arc::new(SqliteProfileStore::open_in_memory().unwrap());
        let durable = store.clone() as Arc<dyn ProfileStore>;
        Self::with_store(store, durable)
    }

    /// Engine whose components write through `durable`, which wraps `store`
    pub fn with_store(store: Arc<SqliteProfileStore>, durable: Arc<dyn ProfileStore>) -> Self {
        let network = Arc::new(MockNetwork::default());
        let hot = Arc::new(HotProfileCache::with_defaults());
        let l2 = ProfileL2::new(Arc::new(MemoryDistributedCache::default()));

        let persister = Arc::new(EntityPersister::new(
            Arc::new(DeploymentTracker::new(TrackerConfig {
                expected_items: 100_000,
                ..TrackerConfig::default()
            })),
            Arc::clone(&hot),
            l2.clone(),
            Arc::clone(&durable),
            WriteQueueConfig {
                concurrency: 4,
                retry_delay: Duration::from_millis(1),
                ..WriteQueueConfig::default()
            },
        ));
        let sanitizer = Arc::new(ProfileSanitizer::new(
            network.clone() as Arc<dyn ContentClient>,
            SanitizerConfig {
                retry: RetryPolicy {
                    attempts: 2,
                    delay: Duration::from_millis(1),
                    timeout: Duration::from_secs(5),
                },
                ..SanitizerConfig::default()
            },
        ));
        let recorder: Arc<dyn NotFoundHandler> =
            Arc::new(FailedFetchRecorder::new(Arc::clone(&durable)));

        Self {
            network,
            store,
            durable,
            hot,
            l2,
            persister,
            sanitizer,
            recorder,
            shutdown: Shutdown::new(),
        }
    }

    pub fn sync_config() -> SynchronizerConfig {
        SynchronizerConfig {
            pointer_changes_batch_delay: Duration::from_millis(1),
            bootstrap_retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            failed_fetch_retry_interval: Duration::from_secs(3600),
            ..SynchronizerConfig::default()
        }
    }

    pub fn snapshots(&self) -> SnapshotsHandler {
        SnapshotsHandler::new(
            self.network.clone() as Arc<dyn ContentClient>,
            Arc::clone(&self.sanitizer),
            Arc::clone(&self.persister),
            Arc::clone(&self.durable),
            Arc::clone(&self.recorder),
            SnapshotsConfig::default(),
            self.shutdown.clone(),
        )
    }

    pub fn synchronizer(&self, config: SynchronizerConfig) -> Synchronizer {
        Synchronizer::new(
            self.network.clone() as Arc<dyn ContentClient>,
            Arc::clone(&self.sanitizer),
            Arc::clone(&self.persister),
            self.snapshots(),
            Arc::clone(&self.durable),
            self.store.clone() as Arc<dyn SyncStateStore>,
            Arc::clone(&self.hot),
            Arc::clone(&self.recorder),
            config,
            self.shutdown.clone(),
        )
    }

    pub fn validator(&self) -> OwnershipValidatorJob {
        self.validator_with(OwnershipConfig {
            initial_delay: Duration::from_millis(1),
            batch_delay: Duration::from_millis(1),
            ..OwnershipConfig::default()
        })
    }

    pub fn validator_with(&self, config: OwnershipConfig) -> OwnershipValidatorJob {
        OwnershipValidatorJob::new(
            self.network.clone() as Arc<dyn ContentClient>,
            Arc::clone(&self.hot),
            Arc::clone(&self.durable),
            self.l2.clone(),
            config,
            self.shutdown.clone(),
        )
    }

    /// Profile stored in L3 for `pointer`
    pub async fn stored(&self, pointer: &str) -> Option<ProfileEntity> {
        self.store
            .get_profiles_by_pointers(&[pointer.to_string()])
            .await
            .unwrap()
            .pop()
    }
}

/// Poll `check` until it holds or a couple of seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
