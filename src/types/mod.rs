//! Shared types: the profile data model and the error taxonomy

pub mod error;
pub mod profile;

pub use error::{Result, SyncError};
pub use profile::{
    normalize_pointer, now_millis, AuthLink, CacheEntry, ContentFile, DeploymentEvent,
    FailedProfileFetch, ProfileDeployment, ProfileEntity, SnapshotMetadata, SyncState, TimeRange,
    PROFILE_ENTITY_TYPE,
};
