//! Profile read path
//!
//! L1 -> L2 -> L3 read-through. Each miss is filled from the next tier down
//! and written back up, L1 through its timestamp gate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::cache::{HotProfileCache, ProfileL2};
use crate::db::ProfileStore;
use crate::types::{normalize_pointer, ProfileEntity, Result};

pub struct ProfileReader {
    hot: Arc<HotProfileCache>,
    l2: ProfileL2,
    store: Arc<dyn ProfileStore>,
}

impl ProfileReader {
    pub fn new(hot: Arc<HotProfileCache>, l2: ProfileL2, store: Arc<dyn ProfileStore>) -> Self {
        Self { hot, l2, store }
    }

    /// Current profiles for `pointers`, in request order; unknown pointers are omitted
    pub async fn get_profiles(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>> {
        let mut seen = HashSet::new();
        let wanted: Vec<String> = pointers
            .iter()
            .map(|p| normalize_pointer(p))
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: HashMap<String, ProfileEntity> = self.hot.get_many(&wanted);
        let l1_hits = found.len();

        let missing = missing_from(&wanted, &found);
        let mut l2_hits = 0;
        if !missing.is_empty() {
            for (pointer, profile) in self.l2.get_profiles(&missing).await {
                self.hot.set_if_newer(&pointer, profile.clone());
                found.insert(pointer, profile);
                l2_hits += 1;
            }
        }

        let missing = missing_from(&wanted, &found);
        let mut l3_hits = 0;
        if !missing.is_empty() {
            let stored = self.store.get_profiles_by_pointers(&missing).await?;
            self.l2.set_profiles(&stored).await;
            for profile in stored {
                if let Some(pointer) = profile.pointer() {
                    self.hot.set_if_newer(&pointer, profile.clone());
                    found.insert(pointer, profile);
                    l3_hits += 1;
                }
            }
        }

        debug!(requested = wanted.len(), l1_hits, l2_hits, l3_hits, "Profile read");
        Ok(wanted.iter().filter_map(|p| found.remove(p)).collect())
    }

    pub async fn get_profile(&self, pointer: &str) -> Result<Option<ProfileEntity>> {
        let mut profiles = self.get_profiles(&[pointer.to_string()]).await?;
        Ok(profiles.pop())
    }
}

fn missing_from(wanted: &[String], found: &HashMap<String, ProfileEntity>) -> Vec<String> {
    wanted
        .iter()
        .filter(|p| !found.contains_key(*p))
        .cloned()
        .collect()
}
