//! Bounded-concurrency durable write queue
//!
//! A fixed set of worker tasks pull profile writes off a shared channel and
//! apply them to the durable store with a short retry. Producers can wait
//! for the queue to drain, which is the flush barrier used at shutdown and
//! at the bootstrap to steady-state transition.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::cache::HotProfileCache;
use crate::db::ProfileStore;
use crate::types::{ProfileEntity, Result, SyncError};

/// Configuration for the write queue
#[derive(Debug, Clone)]
pub struct WriteQueueConfig {
    /// Number of concurrent writers
    pub concurrency: usize,
    /// Maximum queued writes before producers wait
    pub max_queued: usize,
    /// Attempts per write before giving up
    pub write_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 30,
            max_queued: 10_000,
            write_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Write queue statistics
#[derive(Debug, Clone, Default)]
pub struct WriteQueueStats {
    pub pending: usize,
    pub written: u64,
    pub stale: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    store: Arc<dyn ProfileStore>,
    hot: Arc<HotProfileCache>,
    config: WriteQueueConfig,
    pending: AtomicUsize,
    drained: Notify,
    counters: Counters,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Durable write queue feeding the profile store
pub struct WriteQueue {
    tx: mpsc::Sender<ProfileEntity>,
    shared: Arc<Shared>,
}

impl WriteQueue {
    /// Create the queue and spawn its workers
    pub fn new(
        store: Arc<dyn ProfileStore>,
        hot: Arc<HotProfileCache>,
        config: WriteQueueConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<ProfileEntity>(config.max_queued.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let concurrency = config.concurrency.max(1);

        let shared = Arc::new(Shared {
            store,
            hot,
            config,
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            counters: Counters::default(),
        });

        for worker_id in 0..concurrency {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                worker_task(worker_id, rx, shared).await;
            });
        }

        info!(concurrency, "Durable write queue started");

        Self { tx, shared }
    }

    /// Queue a write; waits only if the queue is full
    pub async fn enqueue(&self, entity: ProfileEntity) -> Result<()> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(entity).await.is_err() {
            self.shared.finish_one();
            return Err(SyncError::Internal("Write queue closed".into()));
        }
        Ok(())
    }

    /// Resolves once every queued write has been applied or given up on
    pub async fn wait_for_drain(&self) {
        loop {
            let drained = self.shared.drained.notified();
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WriteQueueStats {
        let counters = &self.shared.counters;
        WriteQueueStats {
            pending: self.pending(),
            written: counters.written.load(Ordering::Relaxed),
            stale: counters.stale.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Worker task that applies queued writes
async fn worker_task(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ProfileEntity>>>,
    shared: Arc<Shared>,
) {
    loop {
        let entity = {
            let mut rx = rx.lock().await;
            match rx.recv().await {
                Some(entity) => entity,
                None => {
                    debug!(worker_id, "Write worker shutting down (channel closed)");
                    return;
                }
            }
        };

        apply_write(&shared, &entity).await;
        shared.finish_one();
    }
}

async fn apply_write(shared: &Shared, entity: &ProfileEntity) {
    let attempts = shared.config.write_attempts.max(1);

    for attempt in 1..=attempts {
        match shared.store.upsert_profile_if_newer(entity).await {
            Ok(true) => {
                shared.counters.written.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(false) => {
                // The store already holds something newer; make L1 fall through to it
                if let Some(pointer) = entity.pointer() {
                    shared.hot.remove_if_entity(&pointer, &entity.id);
                }
                shared.counters.stale.fetch_add(1, Ordering::Relaxed);
                debug!(entity_id = %entity.id, "Queued write superseded by stored profile");
                return;
            }
            Err(e) if attempt < attempts => {
                warn!(entity_id = %entity.id, attempt, error = %e, "Queued profile write failed, retrying");
                tokio::time::sleep(shared.config.retry_delay).await;
            }
            Err(e) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(entity_id = %entity.id, attempts, error = %e, "Queued profile write failed permanently");
            }
        }
    }
}
