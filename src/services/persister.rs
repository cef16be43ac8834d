//! Entity Persister
//!
//! The ingestion funnel every new deployment passes through:
//!
//! 1. collapse near-simultaneous duplicates (tracker short-lived set)
//! 2. timestamp-gated L1 write; stop if not newer
//! 3. mark the entity id as processed (tracker permanent set)
//! 4. invalidate L2 for the pointer (best effort)
//! 5. durable write: queued while bootstrapping, direct afterwards with an
//!    inline retry and the queue as fallback
//!
//! `persist_entity` is fire-and-forget: failures are logged, never returned.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cache::{HotProfileCache, ProfileL2};
use crate::db::ProfileStore;
use crate::tracker::DeploymentTracker;
use crate::types::ProfileEntity;
use crate::worker::{WriteQueue, WriteQueueConfig, WriteQueueStats};

/// Persister statistics
#[derive(Debug, Clone, Default)]
pub struct PersisterStats {
    /// Entities that made it into L1
    pub persisted: u64,
    pub duplicates: u64,
    /// Rejected by L1 because a same-or-newer profile was cached
    pub stale: u64,
    pub queued: u64,
    pub direct_writes: u64,
    /// Direct writes that fell back to the queue
    pub direct_failures: u64,
    pub queue: WriteQueueStats,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    duplicates: AtomicU64,
    stale: AtomicU64,
    queued: AtomicU64,
    direct_writes: AtomicU64,
    direct_failures: AtomicU64,
}

pub struct EntityPersister {
    tracker: Arc<DeploymentTracker>,
    hot: Arc<HotProfileCache>,
    l2: ProfileL2,
    store: Arc<dyn ProfileStore>,
    queue: WriteQueue,
    bootstrap_complete: AtomicBool,
    counters: Counters,
}

impl EntityPersister {
    /// Create the persister and start its write queue workers
    pub fn new(
        tracker: Arc<DeploymentTracker>,
        hot: Arc<HotProfileCache>,
        l2: ProfileL2,
        store: Arc<dyn ProfileStore>,
        queue_config: WriteQueueConfig,
    ) -> Self {
        let queue = WriteQueue::new(Arc::clone(&store), Arc::clone(&hot), queue_config);
        Self {
            tracker,
            hot,
            l2,
            store,
            queue,
            bootstrap_complete: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Whether the tracker has already seen this entity fully processed
    pub fn has_been_processed(&self, entity_id: &str) -> bool {
        self.tracker.has_been_processed(entity_id)
    }

    pub async fn persist_entity(&self, entity: ProfileEntity) {
        if self.tracker.try_mark_duplicate(&entity.id) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(pointer) = entity.pointer() else {
            warn!(entity_id = %entity.id, "Dropping profile entity without a pointer");
            return;
        };

        if !self.hot.set_if_newer(&pointer, entity.clone()) {
            self.counters.stale.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.tracker.mark_as_processed(&entity.id);
        self.counters.persisted.fetch_add(1, Ordering::Relaxed);
        self.l2.invalidate(&pointer).await;

        if !self.is_bootstrap_complete() {
            self.enqueue(entity).await;
            return;
        }

        // One inline retry, then the queue takes over
        for attempt in 1..=2 {
            match self.store.upsert_profile_if_newer(&entity).await {
                Ok(true) => {
                    self.counters.direct_writes.fetch_add(1, Ordering::Relaxed);
                    debug!(entity_id = %entity.id, pointer = %pointer, "Profile persisted");
                    return;
                }
                Ok(false) => {
                    self.hot.remove_if_entity(&pointer, &entity.id);
                    debug!(entity_id = %entity.id, pointer = %pointer, "Stored profile is newer");
                    return;
                }
                Err(e) => {
                    warn!(entity_id = %entity.id, attempt, error = %e, "Direct profile write failed");
                }
            }
        }

        self.counters.direct_failures.fetch_add(1, Ordering::Relaxed);
        self.enqueue(entity).await;
    }

    async fn enqueue(&self, entity: ProfileEntity) {
        let entity_id = entity.id.clone();
        match self.queue.enqueue(entity).await {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!(entity_id = %entity_id, error = %e, "Failed to queue profile write"),
        }
    }

    /// Switch from queued to direct durable writes
    pub fn set_bootstrap_complete(&self) {
        if !self.bootstrap_complete.swap(true, Ordering::SeqCst) {
            info!("Persister switched to direct writes");
        }
    }

    pub fn is_bootstrap_complete(&self) -> bool {
        self.bootstrap_complete.load(Ordering::SeqCst)
    }

    /// Resolves once every queued durable write has completed
    pub async fn wait_for_drain(&self) {
        let pending = self.queue.pending();
        if pending > 0 {
            info!(pending, "Waiting for durable write queue to drain");
        }
        self.queue.wait_for_drain().await;
    }

    pub fn stats(&self) -> PersisterStats {
        PersisterStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Relaxed),
            direct_writes: self.counters.direct_writes.load(Ordering::Relaxed),
            direct_failures: self.counters.direct_failures.load(Ordering::Relaxed),
            queue: self.queue.stats(),
        }
    }
}
