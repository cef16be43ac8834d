//! Distributed cache (L2)
//!
//! L2 is pure read-through / write-invalidate: it may be absent, stale or
//! failing at any moment without affecting correctness. `ProfileL2` wraps a
//! backend and turns every failure into a logged miss.
//!
//! Backends:
//! - [`MemoryDistributedCache`]: in-process, TTL-based (single replica, tests)
//! - [`NatsKvCache`]: NATS JetStream key-value bucket shared by replicas

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::keys::{pointer_from_key, profile_key};
use crate::types::{normalize_pointer, ProfileEntity, Result, SyncError};

/// Key/value backend for the distributed cache
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn purge(&self, key: &str) -> Result<()>;

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Profile-typed, failure-tolerant facade
// =============================================================================

/// Profile view over an L2 backend; never propagates backend errors
#[derive(Clone)]
pub struct ProfileL2 {
    backend: Arc<dyn DistributedCache>,
}

impl ProfileL2 {
    pub fn new(backend: Arc<dyn DistributedCache>) -> Self {
        Self { backend }
    }

    /// Cached profiles keyed by normalized pointer; errors are misses
    pub async fn get_profiles(&self, pointers: &[String]) -> HashMap<String, ProfileEntity> {
        let keys: Vec<String> = pointers.iter().map(|p| profile_key(p)).collect();
        let raw = match self.backend.get_many(&keys).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, count = keys.len(), "L2 read failed, treating as miss");
                return HashMap::new();
            }
        };

        raw.into_iter()
            .filter_map(|(key, value)| {
                let pointer = pointer_from_key(&key)?.to_string();
                match serde_json::from_str::<ProfileEntity>(&value) {
                    Ok(profile) => Some((pointer, profile)),
                    Err(e) => {
                        warn!(key, error = %e, "Discarding undecodable L2 entry");
                        None
                    }
                }
            })
            .collect()
    }

    /// Populate L2 with profiles read from a lower tier
    pub async fn set_profiles(&self, profiles: &[ProfileEntity]) {
        let entries: Vec<(String, String)> = profiles
            .iter()
            .filter_map(|p| {
                let pointer = p.pointer()?;
                let json = serde_json::to_string(p).ok()?;
                Some((profile_key(&pointer), json))
            })
            .collect();

        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.backend.set_many(entries).await {
            warn!(error = %e, "L2 write failed");
        }
    }

    /// Drop the L2 entry for a pointer so the next read repopulates it
    pub async fn invalidate(&self, pointer: &str) {
        let key = profile_key(pointer);
        match self.backend.purge(&key).await {
            Ok(()) => debug!(pointer = %normalize_pointer(pointer), "L2 entry invalidated"),
            Err(e) => warn!(key, error = %e, "L2 invalidation failed"),
        }
    }
}

// =============================================================================
// In-process backend
// =============================================================================

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process L2 with per-entry TTL
pub struct MemoryDistributedCache {
    entries: DashMap<String, MemoryEntry>,
    ttl: Duration,
}

impl MemoryDistributedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryDistributedCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl DistributedCache for MemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// NATS JetStream key-value backend
// =============================================================================

/// L2 backed by a NATS JetStream key-value bucket
pub struct NatsKvCache {
    store: kv::Store,
}

impl NatsKvCache {
    /// Connect and open (or create) the bucket; entry TTL is the bucket's max age
    pub async fn connect(nats_url: &str, bucket: &str, ttl: Duration) -> Result<Self> {
        info!("Connecting to NATS at {} for L2 bucket '{}'", nats_url, bucket);

        let client = async_nats::ConnectOptions::new()
            .name("profile-sync")
            .connection_timeout(Duration::from_secs(5))
            .connect(nats_url)
            .await
            .map_err(|e| SyncError::Cache(format!("Failed to connect to NATS: {}", e)))?;

        let js = jetstream::new(client);
        let store = match js.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => js
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    history: 1,
                    max_age: ttl,
                    ..Default::default()
                })
                .await
                .map_err(|e| SyncError::Cache(format!("Failed to create KV bucket: {}", e)))?,
        };

        info!("L2 bucket '{}' ready", bucket);
        Ok(Self { store })
    }
}

#[async_trait]
impl DistributedCache for NatsKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .store
            .get(key.to_string())
            .await
            .map_err(|e| SyncError::Cache(format!("KV get failed: {}", e)))?;

        value
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| SyncError::Cache(format!("KV value not UTF-8: {}", e)))
            })
            .transpose()
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.store
            .put(key.to_string(), Bytes::from(value))
            .await
            .map_err(|e| SyncError::Cache(format!("KV put failed: {}", e)))?;
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<()> {
        self.store
            .purge(key.to_string())
            .await
            .map_err(|e| SyncError::Cache(format!("KV purge failed: {}", e)))
    }
}
