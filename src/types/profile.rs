//! Profile domain types
//!
//! Field names follow the content network's JSON (camelCase) so entities,
//! deployments and snapshots deserialize straight off the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Entity type tag the network uses for avatar profiles
pub const PROFILE_ENTITY_TYPE: &str = "profile";

/// Current wall-clock time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Normalize a pointer for use as a cache/store key.
///
/// Pointers are wallet addresses; the network treats them case-insensitively.
pub fn normalize_pointer(pointer: &str) -> String {
    pointer.trim().to_lowercase()
}

/// Reference from an entity to one of its content files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFile {
    pub file: String,
    pub hash: String,
}

/// One link of a deployment's authentication chain.
///
/// Signature verification belongs to the network; we only carry it along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLink {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
    #[serde(default)]
    pub signature: String,
}

/// Content-addressed, immutable profile deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEntity {
    /// Content hash of the deployment
    pub id: String,
    pub pointers: Vec<String>,
    /// Deployment time in milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub content: Vec<ContentFile>,
    #[serde(default)]
    pub metadata: JsonValue,
}

impl ProfileEntity {
    /// The normalized pointer this profile occupies (its first pointer).
    pub fn pointer(&self) -> Option<String> {
        self.pointers
            .first()
            .map(|p| normalize_pointer(p))
            .filter(|p| !p.is_empty())
    }

    /// The first avatar of the metadata payload, if any
    pub fn avatar(&self) -> Option<&JsonValue> {
        self.metadata
            .get("avatars")
            .and_then(|a| a.get(0))
            .and_then(|a| a.get("avatar"))
    }

    /// Number of wearables the first avatar has equipped
    pub fn wearable_count(&self) -> usize {
        self.avatar_list_len("wearables")
    }

    /// Number of emotes the first avatar has equipped
    pub fn emote_count(&self) -> usize {
        self.avatar_list_len("emotes")
    }

    fn avatar_list_len(&self, field: &str) -> usize {
        self.avatar()
            .and_then(|a| a.get(field))
            .and_then(|v| v.as_array())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Resolve a content file name to its hash
    pub fn content_hash(&self, file: &str) -> Option<&str> {
        self.content
            .iter()
            .find(|c| c.file == file)
            .map(|c| c.hash.as_str())
    }
}

/// L1 cache slot: the current profile plus when we ingested it.
///
/// `local_timestamp` is for observability only; ordering always uses
/// `profile.timestamp`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub profile: ProfileEntity,
    pub local_timestamp: i64,
}

impl CacheEntry {
    pub fn new(profile: ProfileEntity) -> Self {
        Self {
            profile,
            local_timestamp: now_millis(),
        }
    }
}

/// Minimal deployment notification, awaiting enrichment into a `ProfileEntity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDeployment {
    pub entity_id: String,
    pub pointer: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_chain: Option<Vec<AuthLink>>,
}

/// Item produced by the network's snapshot and pointer-changes streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub entity_id: String,
    pub entity_type: String,
    pub pointers: Vec<String>,
    pub entity_timestamp: i64,
    /// Time the content server accepted the deployment; the sync cursor unit
    #[serde(default)]
    pub local_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_chain: Option<Vec<AuthLink>>,
}

impl DeploymentEvent {
    pub fn is_profile(&self) -> bool {
        self.entity_type == PROFILE_ENTITY_TYPE
    }

    /// Narrow to a profile deployment; `None` for other entity types or
    /// pointer-less events.
    pub fn to_profile_deployment(&self) -> Option<ProfileDeployment> {
        if !self.is_profile() {
            return None;
        }
        let pointer = self.pointers.first().map(|p| normalize_pointer(p))?;
        if pointer.is_empty() {
            return None;
        }
        Some(ProfileDeployment {
            entity_id: self.entity_id.clone(),
            pointer,
            timestamp: self.entity_timestamp,
            auth_chain: self.auth_chain.clone(),
        })
    }
}

/// Durable ledger row for a deployment that could not be enriched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedProfileFetch {
    pub entity_id: String,
    pub pointer: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_chain: Option<Vec<AuthLink>>,
    pub first_failed_at: i64,
    #[serde(default)]
    pub last_retry_at: Option<i64>,
    pub retry_count: u32,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl FailedProfileFetch {
    /// New ledger row for a deployment whose enrichment just failed
    pub fn new(deployment: &ProfileDeployment, error_message: Option<String>) -> Self {
        Self {
            entity_id: deployment.entity_id.clone(),
            pointer: normalize_pointer(&deployment.pointer),
            timestamp: deployment.timestamp,
            auth_chain: deployment.auth_chain.clone(),
            first_failed_at: now_millis(),
            last_retry_at: None,
            retry_count: 0,
            error_message,
        }
    }

    /// The deployment this row stands for, ready to be re-enriched
    pub fn to_deployment(&self) -> ProfileDeployment {
        ProfileDeployment {
            entity_id: self.entity_id.clone(),
            pointer: self.pointer.clone(),
            timestamp: self.timestamp,
            auth_chain: self.auth_chain.clone(),
        }
    }
}

/// Persisted synchronizer progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub bootstrap_complete: bool,
    /// Cursor: local timestamp up to which pointer changes are durably applied
    pub last_pointer_changes_check: i64,
}

/// Time range covered by a snapshot bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub init_timestamp: i64,
    pub end_timestamp: i64,
}

/// Snapshot bundle advertised by a content server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub hash: String,
    pub time_range: TimeRange,
    #[serde(default)]
    pub number_of_entities: Option<u64>,
    #[serde(default)]
    pub replaced_snapshot_hashes: Vec<String>,
}
