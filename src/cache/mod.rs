//! Caching tiers for profile reads
//!
//! - **L1** ([`hot`]): in-process, bounded, timestamp-gated writes
//! - **L2** ([`distributed`]): shared key-value cache, best effort only
//!
//! L3 (the durable store) lives in [`crate::db`].

pub mod distributed;
pub mod hot;
pub mod keys;

pub use distributed::{DistributedCache, MemoryDistributedCache, NatsKvCache, ProfileL2};
pub use hot::{spawn_occupancy_task, HotCacheStats, HotProfileCache};
pub use keys::{hot_key, profile_key};

use std::time::Duration;

/// Hot cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of pointers held in L1
    pub max_entries: usize,
    /// How often occupancy is reported
    pub report_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            report_interval: Duration::from_secs(60),
        }
    }
}
