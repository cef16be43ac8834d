//! Durable store (L3)
//!
//! The durable store is the single source of truth. Every profile write is
//! conditional on the stored entity timestamp, so concurrent or reordered
//! writers converge without coordination.
//!
//! ## Tables
//!
//! - `profiles` - current profile per normalized pointer
//! - `failed_profile_fetches` - deployments that could not be enriched yet
//! - `processed_snapshots` - snapshot bundles already ingested
//! - `sync_state` - persisted synchronizer cursor

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteProfileStore;

use async_trait::async_trait;

use crate::types::{FailedProfileFetch, ProfileEntity, Result, SyncState};

/// Profile storage and the failed-fetch ledger
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Write `entity` for its pointer only if strictly newer than the stored
    /// row. Returns whether the row changed.
    async fn upsert_profile_if_newer(&self, entity: &ProfileEntity) -> Result<bool>;

    /// Like `upsert_profile_if_newer` but also replaces a row with the same
    /// timestamp (in-place corrections of one deployment)
    async fn upsert_profile_correction(&self, entity: &ProfileEntity) -> Result<bool>;

    async fn get_profiles_by_pointers(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>>;

    /// Highest entity timestamp across all stored profiles
    async fn get_latest_profile_timestamp(&self) -> Result<Option<i64>>;

    /// Record a deployment that could not be enriched; an existing row for
    /// the same entity keeps its retry history
    async fn insert_failed_profile_fetch(&self, fetch: &FailedProfileFetch) -> Result<()>;

    /// Oldest ledger rows whose retry count is below `max_retry_count`
    async fn get_failed_profile_fetches(
        &self,
        limit: usize,
        max_retry_count: u32,
    ) -> Result<Vec<FailedProfileFetch>>;

    async fn delete_failed_profile_fetch(&self, entity_id: &str) -> Result<()>;

    /// Whether the ledger holds a row for `entity_id`
    async fn has_failed_profile_fetch(&self, entity_id: &str) -> Result<bool>;

    /// Bump the retry count of a ledger row after an unsuccessful retry
    async fn update_failed_profile_fetch_retry(
        &self,
        entity_id: &str,
        error_message: &str,
    ) -> Result<()>;

    async fn mark_snapshot_processed(&self, hash: &str) -> Result<()>;

    async fn is_snapshot_processed(&self, hash: &str) -> Result<bool>;
}

/// Single-key store for the synchronizer's progress
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn load(&self) -> Result<Option<SyncState>>;

    async fn save(&self, state: &SyncState) -> Result<()>;
}
