//! Snapshots Handler
//!
//! Bulk historical catch-up from the network's time-bounded snapshot
//! bundles. Processed bundles are recorded durably so a re-run skips them.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::persister::EntityPersister;
use super::sanitizer::{NotFoundHandler, ProfileSanitizer};
use crate::db::ProfileStore;
use crate::network::ContentClient;
use crate::shutdown::Shutdown;
use crate::types::{ProfileDeployment, Result, SnapshotMetadata, SyncError};

/// Configuration for snapshot catch-up
#[derive(Debug, Clone)]
pub struct SnapshotsConfig {
    /// Deployments per enrichment batch
    pub batch_size: usize,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

/// Snapshots worth reading to catch up from `from`, oldest first.
///
/// A snapshot qualifies when its range ends after `from`. Snapshots that
/// another qualifying snapshot replaces are dropped.
pub fn select_snapshots(mut snapshots: Vec<SnapshotMetadata>, from: i64) -> Vec<SnapshotMetadata> {
    snapshots.retain(|s| s.time_range.end_timestamp > from);

    let replaced: HashSet<String> = snapshots
        .iter()
        .flat_map(|s| s.replaced_snapshot_hashes.iter().cloned())
        .collect();
    snapshots.retain(|s| !replaced.contains(&s.hash));

    snapshots.sort_by_key(|s| (s.time_range.init_timestamp, s.time_range.end_timestamp));
    snapshots
}

pub struct SnapshotsHandler {
    client: Arc<dyn ContentClient>,
    sanitizer: Arc<ProfileSanitizer>,
    persister: Arc<EntityPersister>,
    store: Arc<dyn ProfileStore>,
    not_found: Arc<dyn NotFoundHandler>,
    config: SnapshotsConfig,
    shutdown: Shutdown,
}

impl SnapshotsHandler {
    pub fn new(
        client: Arc<dyn ContentClient>,
        sanitizer: Arc<ProfileSanitizer>,
        persister: Arc<EntityPersister>,
        store: Arc<dyn ProfileStore>,
        not_found: Arc<dyn NotFoundHandler>,
        config: SnapshotsConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            sanitizer,
            persister,
            store,
            not_found,
            config,
            shutdown,
        }
    }

    /// Catch up from `from` through the available snapshots.
    ///
    /// Returns the highest cursor reached; on failure that is the end of
    /// the last snapshot fully processed.
    pub async fn sync_profiles(&self, from: i64) -> i64 {
        let snapshots = match self.client.list_snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "Could not list snapshots");
                return from;
            }
        };

        let selected = select_snapshots(snapshots, from);
        info!(from, snapshots = selected.len(), "Starting snapshot catch-up");

        let mut cursor = from;
        for snapshot in selected {
            if !self.shutdown.is_running() {
                break;
            }
            let end = snapshot.time_range.end_timestamp;

            match self.store.is_snapshot_processed(&snapshot.hash).await {
                Ok(true) => {
                    debug!(snapshot = %snapshot.hash, "Snapshot already processed");
                    cursor = cursor.max(end);
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(snapshot = %snapshot.hash, error = %e, "Could not check snapshot status"),
            }

            match self.process_snapshot(&snapshot).await {
                Ok(profiles) => {
                    // Bootstrap writes are queued; the mark must not outrun them
                    self.persister.wait_for_drain().await;
                    if let Err(e) = self.store.mark_snapshot_processed(&snapshot.hash).await {
                        warn!(snapshot = %snapshot.hash, error = %e, "Could not mark snapshot processed");
                    }
                    cursor = cursor.max(end);
                    info!(snapshot = %snapshot.hash, profiles, cursor, "Snapshot processed");
                }
                Err(SyncError::Cancelled) => {
                    info!(snapshot = %snapshot.hash, "Snapshot processing cancelled");
                    break;
                }
                Err(e) => {
                    error!(snapshot = %snapshot.hash, error = %e, "Snapshot processing failed");
                    break;
                }
            }
        }

        cursor
    }

    /// Stream one snapshot through sanitizer and persister; returns the
    /// number of profile deployments read
    async fn process_snapshot(&self, snapshot: &SnapshotMetadata) -> Result<usize> {
        let mut stream = self.client.snapshot_deployments(snapshot);
        let mut batch: Vec<ProfileDeployment> = Vec::with_capacity(self.config.batch_size);
        let mut profiles = 0;

        loop {
            let next = self
                .shutdown
                .run_until_cancelled(stream.next())
                .await
                .ok_or(SyncError::Cancelled)?;
            let Some(item) = next else {
                break;
            };

            let Some(deployment) = item?.to_profile_deployment() else {
                continue;
            };
            profiles += 1;
            if self.persister.has_been_processed(&deployment.entity_id) {
                continue;
            }

            batch.push(deployment);
            if batch.len() >= self.config.batch_size {
                self.flush(&mut batch).await;
            }
        }

        self.flush(&mut batch).await;
        Ok(profiles)
    }

    async fn flush(&self, batch: &mut Vec<ProfileDeployment>) {
        if batch.is_empty() {
            return;
        }
        let entities = self
            .sanitizer
            .sanitize_profiles(batch.as_slice(), self.not_found.as_ref())
            .await;
        for entity in entities {
            self.persister.persist_entity(entity).await;
        }
        batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeRange;

    fn snapshot(hash: &str, init: i64, end: i64, replaces: &[&str]) -> SnapshotMetadata {
        SnapshotMetadata {
            hash: hash.to_string(),
            time_range: TimeRange {
                init_timestamp: init,
                end_timestamp: end,
            },
            number_of_entities: None,
            replaced_snapshot_hashes: replaces.iter().map(|h| h.to_string()).collect(),
        }
    }

    #[test]
    fn test_select_orders_and_filters_by_cursor() {
        let selected = select_snapshots(
            vec![
                snapshot("c", 200, 300, &[]),
                snapshot("a", 0, 100, &[]),
                snapshot("b", 100, 200, &[]),
            ],
            150,
        );
        let hashes: Vec<&str> = selected.iter().map(|s| s.hash.as_str()).collect();
        assert_eq!(hashes, vec!["b", "c"]);
    }

    #[test]
    fn test_select_drops_replaced_snapshots() {
        let selected = select_snapshots(
            vec![
                snapshot("daily-1", 0, 10, &[]),
                snapshot("daily-2", 10, 20, &[]),
                snapshot("weekly", 0, 20, &["daily-1", "daily-2"]),
            ],
            0,
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].hash, "weekly");
    }
}
