//! Profile Sanitizer
//!
//! Enriches minimal deployment notifications into full profile entities with
//! one bounded-time network call per batch. Deployments the network does not
//! return are handed to a [`NotFoundHandler`] instead of being dropped.
//!
//! Also hosts the presentation helpers that rewrite avatar snapshot
//! references into resolvable image URLs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, warn};

use crate::db::ProfileStore;
use crate::network::{with_retry, ContentClient, RetryPolicy};
use crate::types::{FailedProfileFetch, ProfileDeployment, ProfileEntity};

/// Reason recorded when the network answers but omits a requested entity
pub const NOT_RETURNED_REASON: &str = "Entity not returned by content server";

/// Configuration for the sanitizer
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Retry-then-timeout policy for the enrichment call
    pub retry: RetryPolicy,
    /// Base URL of the avatar image service
    pub profile_images_url: String,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            profile_images_url: "https://profile-images.decentraland.org".to_string(),
        }
    }
}

// =============================================================================
// Not-found routing
// =============================================================================

/// Receives deployments that could not be enriched
#[async_trait]
pub trait NotFoundHandler: Send + Sync {
    async fn on_not_found(&self, deployment: &ProfileDeployment, reason: &str);
}

/// Writes unresolvable deployments to the failed-fetch ledger
pub struct FailedFetchRecorder {
    store: Arc<dyn ProfileStore>,
}

impl FailedFetchRecorder {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotFoundHandler for FailedFetchRecorder {
    async fn on_not_found(&self, deployment: &ProfileDeployment, reason: &str) {
        let row = FailedProfileFetch::new(deployment, Some(reason.to_string()));
        match self.store.insert_failed_profile_fetch(&row).await {
            Ok(()) => debug!(
                entity_id = %deployment.entity_id,
                pointer = %deployment.pointer,
                reason,
                "Recorded failed profile fetch"
            ),
            Err(e) => error!(
                entity_id = %deployment.entity_id,
                error = %e,
                "Failed to record failed profile fetch"
            ),
        }
    }
}

// =============================================================================
// Sanitizer
// =============================================================================

pub struct ProfileSanitizer {
    client: Arc<dyn ContentClient>,
    config: SanitizerConfig,
}

impl ProfileSanitizer {
    pub fn new(client: Arc<dyn ContentClient>, config: SanitizerConfig) -> Self {
        Self { client, config }
    }

    /// Enrich `deployments` into full entities.
    ///
    /// Every requested deployment ends up either in the result or in
    /// `on_not_found`, once per distinct entity id.
    pub async fn sanitize_profiles(
        &self,
        deployments: &[ProfileDeployment],
        on_not_found: &dyn NotFoundHandler,
    ) -> Vec<ProfileEntity> {
        let mut seen = HashSet::new();
        let unique: Vec<&ProfileDeployment> = deployments
            .iter()
            .filter(|d| seen.insert(d.entity_id.as_str()))
            .collect();
        if unique.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = unique.iter().map(|d| d.entity_id.clone()).collect();
        let client = &self.client;
        let ids_ref = &ids;
        let fetched = with_retry(&self.config.retry, "get_entities_by_ids", move || {
            client.get_entities_by_ids(ids_ref)
        })
        .await;

        let entities = match fetched {
            Ok(entities) => entities,
            Err(e) => {
                warn!(count = ids.len(), error = %e, "Profile enrichment failed, recording batch");
                let reason = e.to_string();
                for deployment in unique {
                    on_not_found.on_not_found(deployment, &reason).await;
                }
                return Vec::new();
            }
        };

        let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let entities: Vec<ProfileEntity> = entities
            .into_iter()
            .filter(|e| requested.contains(e.id.as_str()) && e.pointer().is_some())
            .collect();

        let returned: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        for deployment in unique {
            if !returned.contains(deployment.entity_id.as_str()) {
                on_not_found.on_not_found(deployment, NOT_RETURNED_REASON).await;
            }
        }

        debug!(requested = ids.len(), returned = entities.len(), "Enriched profile batch");
        entities
    }

    /// Metadata with avatar snapshots rewritten to image service URLs
    pub fn get_metadata(&self, entity: &ProfileEntity) -> JsonValue {
        let mut metadata = entity.metadata.clone();
        let base = self.config.profile_images_url.trim_end_matches('/');
        let snapshots = json!({
            "face256": format!("{}/entities/{}/face.png", base, entity.id),
            "body": format!("{}/entities/{}/body.png", base, entity.id),
        });

        if let Some(avatars) = metadata.get_mut("avatars").and_then(|a| a.as_array_mut()) {
            for avatar in avatars {
                if let Some(inner) = avatar.get_mut("avatar").and_then(|a| a.as_object_mut()) {
                    inner.insert("snapshots".to_string(), snapshots.clone());
                }
            }
        }
        metadata
    }

    /// Presentation shape: `{timestamp, avatars}` per entity
    pub fn map_entities_to_profiles(&self, entities: &[ProfileEntity]) -> Vec<JsonValue> {
        entities
            .iter()
            .map(|entity| {
                let metadata = self.get_metadata(entity);
                json!({
                    "timestamp": entity.timestamp,
                    "avatars": metadata.get("avatars").cloned().unwrap_or_else(|| json!([])),
                })
            })
            .collect()
    }
}
