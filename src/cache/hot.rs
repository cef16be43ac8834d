//! Hot Profile Cache (L1)
//!
//! In-process bounded cache of the current profile per pointer. Writes are
//! timestamp-gated: a candidate only replaces the stored entry when its
//! entity timestamp is strictly newer, so out-of-order or duplicate
//! deliveries can never regress a pointer.
//!
//! Eviction is least-recently-used, driven by a logical access clock so
//! reads stay lock-free apart from DashMap's shard locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::keys::hot_key;
use super::CacheConfig;
use crate::shutdown::Shutdown;
use crate::types::{CacheEntry, ProfileEntity};

struct HotSlot {
    entry: CacheEntry,
    last_access: AtomicU64,
}

/// L1 occupancy and hit statistics
#[derive(Debug, Clone, Default)]
pub struct HotCacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejected_stale: u64,
}

impl HotCacheStats {
    /// Occupancy as a percentage of capacity
    pub fn occupancy(&self) -> f64 {
        if self.max_entries == 0 {
            0.0
        } else {
            (self.entries as f64 / self.max_entries as f64) * 100.0
        }
    }
}

/// Bounded, recency-evicting profile cache keyed by normalized pointer
pub struct HotProfileCache {
    entries: DashMap<String, HotSlot>,
    config: CacheConfig,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejected_stale: AtomicU64,
}

impl HotProfileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            rejected_stale: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Current profile for a pointer
    pub fn get(&self, pointer: &str) -> Option<ProfileEntity> {
        let key = hot_key(pointer);
        match self.entries.get(&key) {
            Some(slot) => {
                slot.last_access.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.entry.profile.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current profiles for many pointers; missing pointers are absent from the map
    pub fn get_many(&self, pointers: &[String]) -> HashMap<String, ProfileEntity> {
        pointers
            .iter()
            .filter_map(|p| self.get(p).map(|profile| (hot_key(p), profile)))
            .collect()
    }

    /// Read without touching recency or hit counters (background audits)
    pub fn peek(&self, pointer: &str) -> Option<ProfileEntity> {
        self.entries
            .get(&hot_key(pointer))
            .map(|slot| slot.entry.profile.clone())
    }

    /// Whether a pointer is cached (does not count as an access)
    pub fn has(&self, pointer: &str) -> bool {
        self.entries.contains_key(&hot_key(pointer))
    }

    /// Entity timestamp stored for a pointer, without touching recency
    pub fn timestamp_of(&self, pointer: &str) -> Option<i64> {
        self.entries
            .get(&hot_key(pointer))
            .map(|slot| slot.entry.profile.timestamp)
    }

    /// Store `entity` only if strictly newer than what is cached.
    ///
    /// Returns true when the write happened.
    pub fn set_if_newer(&self, pointer: &str, entity: ProfileEntity) -> bool {
        let key = hot_key(pointer);
        let access = self.tick();

        let written = match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                let stored = slot.get().entry.profile.timestamp;
                if entity.timestamp > stored {
                    slot.insert(HotSlot {
                        entry: CacheEntry::new(entity),
                        last_access: AtomicU64::new(access),
                    });
                    true
                } else {
                    self.rejected_stale.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        pointer,
                        candidate = entity.timestamp,
                        stored,
                        "Hot cache write rejected (not newer)"
                    );
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(HotSlot {
                    entry: CacheEntry::new(entity),
                    last_access: AtomicU64::new(access),
                });
                true
            }
        };

        if written {
            self.maybe_evict();
        }
        written
    }

    /// `set_if_newer` for a batch; returns how many were written
    pub fn set_many_if_newer(&self, entities: Vec<ProfileEntity>) -> usize {
        entities
            .into_iter()
            .filter_map(|e| e.pointer().map(|p| (p, e)))
            .filter(|(pointer, entity)| self.set_if_newer(pointer, entity.clone()))
            .count()
    }

    /// Unconditional write, used by the ownership correction path where the
    /// same deployment may legitimately change in place.
    pub fn set(&self, pointer: &str, entity: ProfileEntity) {
        let access = self.tick();
        self.entries.insert(
            hot_key(pointer),
            HotSlot {
                entry: CacheEntry::new(entity),
                last_access: AtomicU64::new(access),
            },
        );
        self.maybe_evict();
    }

    /// Drop the cached entry only if it still holds `entity_id`
    pub fn remove_if_entity(&self, pointer: &str, entity_id: &str) -> bool {
        self.entries
            .remove_if(&hot_key(pointer), |_, slot| slot.entry.profile.id == entity_id)
            .is_some()
    }

    /// Every pointer currently cached
    pub fn get_all_pointers(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    pub fn stats(&self) -> HotCacheStats {
        HotCacheStats {
            entries: self.entries.len(),
            max_entries: self.config.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected_stale: self.rejected_stale.load(Ordering::Relaxed),
        }
    }

    /// Evict least recently used entries if over capacity
    fn maybe_evict(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        // Evict a little extra to avoid evicting on every insert
        let slack = (self.config.max_entries / 100).max(1);
        let to_evict = self.entries.len() - self.config.max_entries + slack;

        let mut candidates: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().last_access.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_by_key(|(_, access)| *access);

        let mut evicted = 0u64;
        for (key, _) in candidates.into_iter().take(to_evict) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(evicted, "Evicted hot cache entries");
    }
}

impl Default for HotProfileCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Spawn a background task that periodically reports L1 occupancy
pub fn spawn_occupancy_task(
    cache: Arc<HotProfileCache>,
    shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    let interval = cache.config.report_interval;

    tokio::spawn(async move {
        info!("Hot cache occupancy reporter started");
        loop {
            if !shutdown.sleep(interval).await {
                break;
            }
            let stats = cache.stats();
            let occupancy = stats.occupancy();
            if occupancy >= 90.0 {
                warn!(
                    entries = stats.entries,
                    max_entries = stats.max_entries,
                    occupancy = format!("{:.1}%", occupancy),
                    evictions = stats.evictions,
                    "Hot cache near capacity"
                );
            } else {
                info!(
                    entries = stats.entries,
                    max_entries = stats.max_entries,
                    occupancy = format!("{:.1}%", occupancy),
                    hits = stats.hits,
                    misses = stats.misses,
                    "Hot cache occupancy"
                );
            }
        }
        info!("Hot cache occupancy reporter stopped");
    })
}
