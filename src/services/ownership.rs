//! Ownership Validator Job
//!
//! Periodically re-fetches the canonical profile for every pointer held in
//! L1 and corrects drift. A deployment can change after the fact (items
//! transferred away or banned), which the network reflects in its
//! sanitized view without issuing a new deployment.
//!
//! Corrections write straight through L1 and L3; they are not new
//! deployments, so the persister's dedup and queueing do not apply.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{HotProfileCache, ProfileL2};
use crate::db::ProfileStore;
use crate::network::ContentClient;
use crate::shutdown::Shutdown;
use crate::types::{ProfileEntity, Result, SyncError};

/// Configuration for the ownership validator
#[derive(Debug, Clone)]
pub struct OwnershipConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Pointers per canonical lookup
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(300),
            batch_size: 50,
            batch_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one validation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationCycleStats {
    pub checked: usize,
    pub updated: usize,
    pub batch_failures: usize,
}

/// Whether the canonical entity should replace the cached one.
///
/// Different deployment: only if canonical is strictly newer. Same
/// deployment: only if its equipped wearables or emotes changed.
pub fn needs_update(cached: &ProfileEntity, canonical: &ProfileEntity) -> bool {
    if cached.id != canonical.id {
        return canonical.timestamp > cached.timestamp;
    }
    cached.wearable_count() != canonical.wearable_count()
        || cached.emote_count() != canonical.emote_count()
}

pub struct OwnershipValidatorJob {
    client: Arc<dyn ContentClient>,
    hot: Arc<HotProfileCache>,
    store: Arc<dyn ProfileStore>,
    l2: ProfileL2,
    config: OwnershipConfig,
    shutdown: Shutdown,
}

impl OwnershipValidatorJob {
    pub fn new(
        client: Arc<dyn ContentClient>,
        hot: Arc<HotProfileCache>,
        store: Arc<dyn ProfileStore>,
        l2: ProfileL2,
        config: OwnershipConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            hot,
            store,
            l2,
            config,
            shutdown,
        }
    }

    /// Spawn the periodic job
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!(
            initial_delay_secs = self.config.initial_delay.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "Ownership validator scheduled"
        );
        if !self.shutdown.sleep(self.config.initial_delay).await {
            return;
        }
        loop {
            self.validate_all().await;
            if !self.shutdown.sleep(self.config.interval).await {
                break;
            }
        }
        info!("Ownership validator stopped");
    }

    /// Stop scheduling cycles; a batch in flight finishes first
    pub fn stop(&self) {
        info!("Stopping ownership validator");
        self.shutdown.trigger();
    }

    /// Validate every pointer currently in L1
    pub async fn validate_all(&self) -> ValidationCycleStats {
        let pointers = self.hot.get_all_pointers();
        let mut stats = ValidationCycleStats::default();
        if pointers.is_empty() {
            return stats;
        }

        for (index, batch) in pointers.chunks(self.config.batch_size.max(1)).enumerate() {
            if index > 0 && !self.shutdown.sleep(self.config.batch_delay).await {
                break;
            }
            if !self.shutdown.is_running() {
                break;
            }

            match self.validate_batch(batch).await {
                Ok((checked, updated)) => {
                    stats.checked += checked;
                    stats.updated += updated;
                }
                Err(e) => {
                    stats.batch_failures += 1;
                    warn!(batch = index, size = batch.len(), error = %e, "Ownership batch failed");
                }
            }
        }

        info!(
            pointers = pointers.len(),
            checked = stats.checked,
            updated = stats.updated,
            batch_failures = stats.batch_failures,
            "Ownership validation cycle finished"
        );
        stats
    }

    async fn validate_batch(&self, pointers: &[String]) -> Result<(usize, usize)> {
        let canonical = tokio::time::timeout(
            self.config.request_timeout,
            self.client.get_sanitized_profiles(pointers),
        )
        .await
        .map_err(|_| SyncError::Timeout("canonical profile lookup".into()))??;

        let mut checked = 0;
        let mut updated = 0;
        for entity in canonical {
            let Some(pointer) = entity.pointer() else {
                continue;
            };
            let Some(cached) = self.hot.peek(&pointer) else {
                continue;
            };
            checked += 1;

            if needs_update(&cached, &entity) {
                debug!(
                    pointer = %pointer,
                    cached = %cached.id,
                    canonical = %entity.id,
                    "Correcting profile from canonical state"
                );
                self.apply_correction(&pointer, &cached, entity).await;
                updated += 1;
            }
        }
        Ok((checked, updated))
    }

    async fn apply_correction(&self, pointer: &str, cached: &ProfileEntity, canonical: ProfileEntity) {
        if cached.id == canonical.id {
            self.hot.set(pointer, canonical.clone());
        } else {
            self.hot.set_if_newer(pointer, canonical.clone());
        }

        if let Err(e) = self.store.upsert_profile_correction(&canonical).await {
            warn!(pointer, entity_id = %canonical.id, error = %e, "Could not store profile correction");
        }
        self.l2.invalidate(pointer).await;
    }
}
