//! Sync engine services
//!
//! Data flows Synchronizer -> (Snapshots | pointer changes) -> Sanitizer ->
//! Persister -> {L1, L2, L3}. The ownership validator audits L1 against the
//! network on its own schedule, and the reader serves lookups.

pub mod ownership;
pub mod persister;
pub mod reader;
pub mod sanitizer;
pub mod snapshots;
pub mod synchronizer;

pub use ownership::{needs_update, OwnershipConfig, OwnershipValidatorJob, ValidationCycleStats};
pub use persister::{EntityPersister, PersisterStats};
pub use reader::ProfileReader;
pub use sanitizer::{
    FailedFetchRecorder, NotFoundHandler, ProfileSanitizer, SanitizerConfig, NOT_RETURNED_REASON,
};
pub use snapshots::{select_snapshots, SnapshotsConfig, SnapshotsHandler};
pub use synchronizer::{
    select_strategy, RetryCycleStats, SyncStrategy, Synchronizer, SynchronizerConfig,
    GENESIS_TIMESTAMP,
};
