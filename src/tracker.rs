//! Deployment Tracker - "have we already ingested this entity?"
//!
//! Two layers:
//!
//! - **Permanent set**: a bloom filter sized for tens of millions of entity
//!   ids. Answers "ever processed" with no false negatives and a bounded
//!   false-positive rate (a genuinely new entity is skipped with probability
//!   close to the configured error rate).
//! - **Recent set**: a tiny exact set with a short TTL that collapses the
//!   same entity arriving twice within milliseconds (overlapping stream pages,
//!   a poll racing a retry).
//!
//! Both layers are lock-free or shard-locked, so the steady-state loops can
//! share one tracker without further coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Expected number of distinct entity ids over the process lifetime
    pub expected_items: usize,
    /// Target false-positive rate of the permanent set
    pub false_positive_rate: f64,
    /// Capacity of the short-lived exact set
    pub recent_capacity: usize,
    /// TTL of entries in the short-lived exact set
    pub recent_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            expected_items: 10_000_000,
            false_positive_rate: 0.001,
            recent_capacity: 100,
            recent_ttl: Duration::from_secs(60),
        }
    }
}

/// Concurrent bloom filter over a flat atomic bit array
struct BloomFilter {
    bits: Vec<AtomicU64>,
    bit_count: u64,
    hash_count: u32,
}

impl BloomFilter {
    fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let bit_count = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hash_count = ((bit_count as f64 / n) * ln2).round().clamp(1.0, 32.0) as u32;
        let words = bit_count.div_ceil(64) as usize;

        Self {
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            bit_count,
            hash_count,
        }
    }

    /// Double hashing: index_i = h1 + i * h2 (mod m)
    fn indexes(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let digest = Sha256::digest(item.as_bytes());
        let mut h1_bytes = [0u8; 8];
        let mut h2_bytes = [0u8; 8];
        h1_bytes.copy_from_slice(&digest[0..8]);
        h2_bytes.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(h1_bytes);
        let h2 = u64::from_le_bytes(h2_bytes) | 1;

        (0..self.hash_count as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count)
    }

    fn insert(&self, item: &str) {
        for idx in self.indexes(item) {
            let word = (idx / 64) as usize;
            let mask = 1u64 << (idx % 64);
            self.bits[word].fetch_or(mask, Ordering::Relaxed);
        }
    }

    fn contains(&self, item: &str) -> bool {
        self.indexes(item).all(|idx| {
            let word = (idx / 64) as usize;
            let mask = 1u64 << (idx % 64);
            self.bits[word].load(Ordering::Relaxed) & mask != 0
        })
    }

    fn size_bytes(&self) -> usize {
        self.bits.len() * 8
    }
}

/// Tracker statistics
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub marked_processed: u64,
    pub duplicates_collapsed: u64,
    pub recent_entries: usize,
}

/// Deployment tracker shared by every ingestion path
pub struct DeploymentTracker {
    permanent: BloomFilter,
    recent: DashMap<String, Instant>,
    config: TrackerConfig,
    marked_processed: AtomicU64,
    duplicates_collapsed: AtomicU64,
}

impl DeploymentTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let permanent = BloomFilter::new(config.expected_items, config.false_positive_rate);
        info!(
            expected_items = config.expected_items,
            false_positive_rate = config.false_positive_rate,
            hash_count = permanent.hash_count,
            size_mb = permanent.size_bytes() / (1024 * 1024),
            "Deployment tracker initialized"
        );

        Self {
            permanent,
            recent: DashMap::new(),
            config,
            marked_processed: AtomicU64::new(0),
            duplicates_collapsed: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    /// Whether this entity id has (probably) been fully processed before
    pub fn has_been_processed(&self, entity_id: &str) -> bool {
        self.permanent.contains(entity_id)
    }

    /// Record an entity id as fully processed
    pub fn mark_as_processed(&self, entity_id: &str) {
        self.permanent.insert(entity_id);
        self.marked_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true if `entity_id` was seen within the recent TTL, in which
    /// case nothing else happens. Otherwise records it and returns false.
    pub fn try_mark_duplicate(&self, entity_id: &str) -> bool {
        let now = Instant::now();
        let inserted = match self.recent.entry(entity_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) < self.config.recent_ttl {
                    self.duplicates_collapsed.fetch_add(1, Ordering::Relaxed);
                    debug!(entity_id, "Duplicate entity collapsed");
                    return true;
                }
                slot.insert(now);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        };

        // Shard guard is released by now; safe to scan for eviction
        if inserted {
            self.evict_recent(now);
        }
        false
    }

    /// Keep the recent set within capacity: expired first, then oldest
    fn evict_recent(&self, now: Instant) {
        if self.recent.len() <= self.config.recent_capacity {
            return;
        }

        let ttl = self.config.recent_ttl;
        self.recent.retain(|_, seen| now.duration_since(*seen) < ttl);

        let overflow = self.recent.len().saturating_sub(self.config.recent_capacity);
        if overflow == 0 {
            return;
        }

        let mut entries: Vec<(String, Instant)> = self
            .recent
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, seen)| *seen);

        for (key, _) in entries.into_iter().take(overflow) {
            self.recent.remove(&key);
        }
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            marked_processed: self.marked_processed.load(Ordering::Relaxed),
            duplicates_collapsed: self.duplicates_collapsed.load(Ordering::Relaxed),
            recent_entries: self.recent.len(),
        }
    }
}
