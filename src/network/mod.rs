//! Content network client
//!
//! The network is consumed as a black box: entity lookups, canonical profile
//! lookups and two streaming feeds (snapshot bundles and pointer changes).
//! Streams are lazy and finite per call; callers restart them from a cursor.

pub mod catalyst;
pub mod retry;

pub use catalyst::{CatalystClient, CatalystConfig};
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{DeploymentEvent, ProfileEntity, Result, SnapshotMetadata};

/// Pull-based sequence of deployment notifications
pub type DeploymentStream = BoxStream<'static, Result<DeploymentEvent>>;

/// Read access to the content network
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Full entities for the given deployment ids; unknown ids are absent
    async fn get_entities_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileEntity>>;

    /// Canonical (ownership-checked) profiles for the given pointers
    async fn get_sanitized_profiles(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>>;

    /// Snapshot bundles currently advertised by the network
    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>>;

    /// Every deployment recorded in a snapshot bundle
    fn snapshot_deployments(&self, snapshot: &SnapshotMetadata) -> DeploymentStream;

    /// Profile deployments accepted at or after `from` (local timestamp), oldest first
    fn pointer_changes(&self, from: i64) -> DeploymentStream;
}
