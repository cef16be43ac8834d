//! Synchronizer
//!
//! Top-level orchestrator of profile ingestion:
//!
//! ```text
//! INIT -> RESOLVE_CURSOR -> SELECT_STRATEGY
//!      -> BOOTSTRAP { snapshots?, pointer changes }
//!      -> STEADY_STATE { incremental poll || failed-fetch retry }
//!      -> STOPPED
//! ```
//!
//! The cursor is the network's local timestamp of the last applied
//! notification. It is persisted at batch boundaries and on stop so a
//! restart resumes where the previous process left off.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::persister::EntityPersister;
use super::sanitizer::{NotFoundHandler, ProfileSanitizer, NOT_RETURNED_REASON};
use super::snapshots::SnapshotsHandler;
use crate::cache::HotProfileCache;
use crate::db::{ProfileStore, SyncStateStore};
use crate::network::ContentClient;
use crate::shutdown::Shutdown;
use crate::types::{
    now_millis, FailedProfileFetch, ProfileDeployment, Result, SyncError, SyncState,
};

/// 2020-01-01T00:00:00Z, before the first profile deployment
pub const GENESIS_TIMESTAMP: i64 = 1_577_836_800_000;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Configuration for the synchronizer
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Cursor age beyond which bootstrap starts with snapshots
    pub bootstrap_threshold_days: i64,
    pub genesis_timestamp: i64,
    pub pointer_changes_batch_size: usize,
    pub pointer_changes_batch_delay: Duration,
    /// Consecutive repeats of one entity id that mean the stream head was reached
    pub head_repeat_threshold: u32,
    /// Persist the cursor every N pointer-changes batches
    pub cursor_persist_every: u64,
    pub bootstrap_attempts: u32,
    pub bootstrap_retry_delay: Duration,
    pub poll_interval: Duration,
    pub failed_fetch_retry_interval: Duration,
    pub failed_fetch_batch_size: usize,
    pub max_failed_fetch_retries: u32,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            bootstrap_threshold_days: 7,
            genesis_timestamp: GENESIS_TIMESTAMP,
            pointer_changes_batch_size: 20,
            pointer_changes_batch_delay: Duration::from_millis(100),
            head_repeat_threshold: 3,
            cursor_persist_every: 10,
            bootstrap_attempts: 3,
            bootstrap_retry_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            failed_fetch_retry_interval: Duration::from_secs(60),
            failed_fetch_batch_size: 100,
            max_failed_fetch_retries: 5,
        }
    }
}

/// How bootstrap closes the gap between the cursor and now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Cursor is old: read snapshots first, then pointer changes
    SnapshotsThenPointerChanges,
    PointerChanges,
}

/// Pick the bootstrap strategy for a cursor
pub fn select_strategy(cursor: i64, now: i64, threshold_days: i64) -> SyncStrategy {
    if now.saturating_sub(cursor) > threshold_days.saturating_mul(DAY_MS) {
        SyncStrategy::SnapshotsThenPointerChanges
    } else {
        SyncStrategy::PointerChanges
    }
}

/// Outcome of one failed-fetch retry cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCycleStats {
    pub succeeded: usize,
    /// Rows dropped because the pointer already holds a same-or-newer profile
    pub skipped: usize,
    pub failed: usize,
}

/// Captures why a single retried deployment could not be enriched
#[derive(Default)]
struct RetryFailure(Mutex<Option<String>>);

#[async_trait]
impl NotFoundHandler for RetryFailure {
    async fn on_not_found(&self, _deployment: &ProfileDeployment, reason: &str) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(reason.to_string());
        }
    }
}

impl RetryFailure {
    fn reason(&self) -> String {
        self.0
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| NOT_RETURNED_REASON.to_string())
    }
}

pub struct Synchronizer {
    client: Arc<dyn ContentClient>,
    sanitizer: Arc<ProfileSanitizer>,
    persister: Arc<EntityPersister>,
    snapshots: SnapshotsHandler,
    store: Arc<dyn ProfileStore>,
    state_store: Arc<dyn SyncStateStore>,
    hot: Arc<HotProfileCache>,
    not_found: Arc<dyn NotFoundHandler>,
    config: SynchronizerConfig,
    shutdown: Shutdown,
    cursor: AtomicI64,
}

impl Synchronizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ContentClient>,
        sanitizer: Arc<ProfileSanitizer>,
        persister: Arc<EntityPersister>,
        snapshots: SnapshotsHandler,
        store: Arc<dyn ProfileStore>,
        state_store: Arc<dyn SyncStateStore>,
        hot: Arc<HotProfileCache>,
        not_found: Arc<dyn NotFoundHandler>,
        config: SynchronizerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let genesis = config.genesis_timestamp;
        Self {
            client,
            sanitizer,
            persister,
            snapshots,
            store,
            state_store,
            hot,
            not_found,
            config,
            shutdown,
            cursor: AtomicI64::new(genesis),
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }

    fn advance_cursor(&self, to: i64) {
        self.cursor.fetch_max(to, Ordering::SeqCst);
    }

    /// Run until stopped: resolve cursor, bootstrap if needed, then steady state
    pub async fn run(&self) {
        let (cursor, bootstrap_complete) = self.resolve_cursor().await;
        self.cursor.store(cursor, Ordering::SeqCst);

        let strategy = select_strategy(cursor, now_millis(), self.config.bootstrap_threshold_days);
        info!(cursor, ?strategy, bootstrap_complete, "Synchronizer starting");

        if bootstrap_complete && strategy == SyncStrategy::PointerChanges {
            self.persister.set_bootstrap_complete();
            info!(cursor, "Resuming steady state from persisted cursor");
        } else {
            self.bootstrap().await;
        }

        if self.shutdown.is_running() {
            self.steady_state().await;
        }
        info!(cursor = self.cursor(), "Synchronizer stopped");
    }

    /// Persisted cursor, else newest stored profile, else genesis
    pub async fn resolve_cursor(&self) -> (i64, bool) {
        match self.state_store.load().await {
            Ok(Some(state)) if state.last_pointer_changes_check > 0 => {
                return (state.last_pointer_changes_check, state.bootstrap_complete);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not load sync state"),
        }

        match self.store.get_latest_profile_timestamp().await {
            Ok(Some(latest)) => (latest, false),
            Ok(None) => (self.config.genesis_timestamp, false),
            Err(e) => {
                warn!(error = %e, "Could not read latest profile timestamp, starting from genesis");
                (self.config.genesis_timestamp, false)
            }
        }
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    async fn bootstrap(&self) {
        let attempts = self.config.bootstrap_attempts.max(1);

        for attempt in 1..=attempts {
            if !self.shutdown.is_running() {
                return;
            }
            match self.bootstrap_once().await {
                Ok(()) => {
                    self.complete_bootstrap().await;
                    return;
                }
                Err(SyncError::Cancelled) => return,
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Bootstrap attempt failed");
                    if attempt < attempts && !self.shutdown.sleep(self.config.bootstrap_retry_delay).await {
                        return;
                    }
                }
            }
        }

        let abandoned_from = self.cursor();
        let now = now_millis();
        error!(
            attempts,
            abandoned_from,
            now,
            "Bootstrap failed on every attempt; forcing completion at current time, deployments in between will not be replayed"
        );
        self.advance_cursor(now);
        self.complete_bootstrap().await;
    }

    async fn bootstrap_once(&self) -> Result<()> {
        let strategy = select_strategy(
            self.cursor(),
            now_millis(),
            self.config.bootstrap_threshold_days,
        );

        if strategy == SyncStrategy::SnapshotsThenPointerChanges {
            let reached = self.snapshots.sync_profiles(self.cursor()).await;
            self.advance_cursor(reached);
            self.checkpoint().await;
            if !self.shutdown.is_running() {
                return Err(SyncError::Cancelled);
            }
        }

        self.pointer_changes_phase().await
    }

    async fn complete_bootstrap(&self) {
        self.persister.wait_for_drain().await;
        self.persister.set_bootstrap_complete();
        self.save_state().await;
        info!(cursor = self.cursor(), "Bootstrap complete");
    }

    /// Replay pointer changes from the cursor until the stream head.
    ///
    /// The stream has no end-of-backlog marker. Each pass reopens it at the
    /// cursor (inclusive), so once caught up a pass only repeats the last
    /// entity; enough consecutive repeats, enough passes that do not move
    /// the cursor, or an empty pass, end the phase.
    async fn pointer_changes_phase(&self) -> Result<()> {
        let mut last_entity_id: Option<String> = None;
        let mut repeats = 0u32;
        let mut stalled_passes = 0u32;
        let mut batches = 0u64;
        let mut batch: Vec<ProfileDeployment> = Vec::new();

        loop {
            let from = self.cursor();
            let mut stream = self.client.pointer_changes(from);
            let mut pass_events = 0usize;
            let mut pending_cursor = from;

            loop {
                let next = self
                    .shutdown
                    .run_until_cancelled(stream.next())
                    .await
                    .ok_or(SyncError::Cancelled)?;
                let Some(item) = next else {
                    break;
                };
                let event = item?;
                pass_events += 1;

                if last_entity_id.as_deref() == Some(event.entity_id.as_str()) {
                    repeats += 1;
                    if repeats >= self.config.head_repeat_threshold {
                        self.flush_batch(&mut batch, pending_cursor).await;
                        info!(cursor = self.cursor(), repeats, "Pointer changes caught up to head");
                        return Ok(());
                    }
                    continue;
                }
                last_entity_id = Some(event.entity_id.clone());
                repeats = 0;
                pending_cursor = pending_cursor.max(event.local_timestamp);

                let Some(deployment) = event.to_profile_deployment() else {
                    continue;
                };
                if self.persister.has_been_processed(&deployment.entity_id) {
                    continue;
                }

                batch.push(deployment);
                if batch.len() >= self.config.pointer_changes_batch_size {
                    self.flush_batch(&mut batch, pending_cursor).await;
                    batches += 1;
                    if batches % self.config.cursor_persist_every.max(1) == 0 {
                        self.checkpoint().await;
                    }
                    if !self
                        .shutdown
                        .sleep(self.config.pointer_changes_batch_delay)
                        .await
                    {
                        return Err(SyncError::Cancelled);
                    }
                }
            }

            self.flush_batch(&mut batch, pending_cursor).await;
            if pass_events == 0 {
                info!(cursor = self.cursor(), "Pointer changes stream empty, caught up");
                return Ok(());
            }
            // Several entities sharing the head timestamp never repeat back to back
            if pending_cursor <= from {
                stalled_passes += 1;
                if stalled_passes >= self.config.head_repeat_threshold {
                    info!(cursor = self.cursor(), stalled_passes, "Pointer changes caught up to head");
                    return Ok(());
                }
            } else {
                stalled_passes = 0;
            }
            debug!(pass_events, repeats, cursor = self.cursor(), "Pointer changes pass finished");
            if !self
                .shutdown
                .sleep(self.config.pointer_changes_batch_delay)
                .await
            {
                return Err(SyncError::Cancelled);
            }
        }
    }

    /// Enrich and persist a batch, then move the cursor past it
    async fn flush_batch(&self, batch: &mut Vec<ProfileDeployment>, cursor: i64) {
        if !batch.is_empty() {
            let entities = self
                .sanitizer
                .sanitize_profiles(batch.as_slice(), self.not_found.as_ref())
                .await;
            for entity in entities {
                self.persister.persist_entity(entity).await;
            }
            batch.clear();
        }
        self.advance_cursor(cursor);
    }

    // =========================================================================
    // Steady state
    // =========================================================================

    async fn steady_state(&self) {
        info!(cursor = self.cursor(), "Entering steady state");
        tokio::join!(self.poll_loop(), self.failed_fetch_retry_loop());
    }

    async fn poll_loop(&self) {
        while self.shutdown.is_running() {
            self.poll_once().await;
            if !self.shutdown.sleep(self.config.poll_interval).await {
                break;
            }
        }
        debug!("Poll loop stopped");
    }

    /// One incremental poll; returns the number of profiles enriched
    pub async fn poll_once(&self) -> usize {
        let from = self.cursor();
        let mut stream = self.client.pointer_changes(from);
        let mut newest = from;
        let mut enriched = 0;

        loop {
            let Some(next) = self.shutdown.run_until_cancelled(stream.next()).await else {
                break;
            };
            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(from, error = %e, "Pointer changes poll failed");
                    break;
                }
                None => break,
            };

            if let Some(deployment) = event.to_profile_deployment() {
                if !self.persister.has_been_processed(&deployment.entity_id)
                    && !self.is_left_to_retry(&deployment, event.local_timestamp <= from).await
                {
                    let entities = self
                        .sanitizer
                        .sanitize_profiles(std::slice::from_ref(&deployment), self.not_found.as_ref())
                        .await;
                    for entity in entities {
                        enriched += 1;
                        self.persister.persist_entity(entity).await;
                    }
                }
            }
            newest = newest.max(event.local_timestamp);
        }

        if newest > from {
            self.advance_cursor(newest);
            self.checkpoint().await;
            debug!(cursor = newest, enriched, "Cursor advanced");
        }
        enriched
    }

    /// The stream reopens at the cursor inclusively, so deployments seen by
    /// the previous poll come back; failed ones belong to the retry loop.
    async fn is_left_to_retry(&self, deployment: &ProfileDeployment, at_cursor: bool) -> bool {
        if !at_cursor {
            return false;
        }
        match self.store.has_failed_profile_fetch(&deployment.entity_id).await {
            Ok(found) => {
                if found {
                    debug!(entity_id = %deployment.entity_id, "Skipping replayed deployment, left to retry loop");
                }
                found
            }
            Err(e) => {
                warn!(entity_id = %deployment.entity_id, error = %e, "Could not check failed-fetch ledger");
                false
            }
        }
    }

    async fn failed_fetch_retry_loop(&self) {
        while self.shutdown.sleep(self.config.failed_fetch_retry_interval).await {
            self.retry_failed_fetches().await;
        }
        debug!("Failed-fetch retry loop stopped");
    }

    /// One pass over the failed-fetch ledger
    pub async fn retry_failed_fetches(&self) -> RetryCycleStats {
        let mut stats = RetryCycleStats::default();

        let rows = match self
            .store
            .get_failed_profile_fetches(
                self.config.failed_fetch_batch_size,
                self.config.max_failed_fetch_retries,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not load failed profile fetches");
                return stats;
            }
        };
        if rows.is_empty() {
            return stats;
        }

        for row in rows {
            if !self.shutdown.is_running() {
                break;
            }

            if self.is_superseded(&row).await {
                if let Err(e) = self.store.delete_failed_profile_fetch(&row.entity_id).await {
                    warn!(entity_id = %row.entity_id, error = %e, "Could not delete superseded fetch");
                }
                stats.skipped += 1;
                continue;
            }

            let failure = RetryFailure::default();
            let deployment = row.to_deployment();
            let entity = self
                .sanitizer
                .sanitize_profiles(std::slice::from_ref(&deployment), &failure)
                .await
                .into_iter()
                .find(|e| e.id == row.entity_id);

            match entity {
                Some(entity) => {
                    self.persister.persist_entity(entity).await;
                    if let Err(e) = self.store.delete_failed_profile_fetch(&row.entity_id).await {
                        warn!(entity_id = %row.entity_id, error = %e, "Could not delete recovered fetch");
                    }
                    stats.succeeded += 1;
                }
                None => {
                    let reason = failure.reason();
                    if let Err(e) = self
                        .store
                        .update_failed_profile_fetch_retry(&row.entity_id, &reason)
                        .await
                    {
                        warn!(entity_id = %row.entity_id, error = %e, "Could not update failed fetch");
                    }
                    stats.failed += 1;
                }
            }
        }

        info!(
            succeeded = stats.succeeded,
            skipped = stats.skipped,
            failed = stats.failed,
            "Failed-fetch retry cycle finished"
        );
        stats
    }

    /// Whether the row's pointer already holds a same-or-newer profile
    async fn is_superseded(&self, row: &FailedProfileFetch) -> bool {
        if let Some(cached) = self.hot.timestamp_of(&row.pointer) {
            if cached >= row.timestamp {
                return true;
            }
        }

        match self
            .store
            .get_profiles_by_pointers(std::slice::from_ref(&row.pointer))
            .await
        {
            Ok(stored) => stored.iter().any(|p| p.timestamp >= row.timestamp),
            Err(e) => {
                warn!(pointer = %row.pointer, error = %e, "Could not read stored profile");
                false
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist the cursor once every write behind it has reached L3
    async fn checkpoint(&self) {
        self.persister.wait_for_drain().await;
        self.save_state().await;
    }

    async fn save_state(&self) {
        let state = SyncState {
            bootstrap_complete: self.persister.is_bootstrap_complete(),
            last_pointer_changes_check: self.cursor(),
        };
        if let Err(e) = self.state_store.save(&state).await {
            warn!(error = %e, "Could not persist sync state");
        }
    }

    /// Stop loops, flush queued writes and persist the final cursor
    pub async fn stop(&self) {
        info!("Stopping synchronizer");
        self.shutdown.trigger();
        self.checkpoint().await;
        info!(cursor = self.cursor(), "Synchronizer state saved");
    }
}
