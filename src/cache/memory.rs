//! In-process dedup backend: a mutex-guarded map from id to insertion time.
//!
//! Eviction is lazy — every `add` runs a full-map sweep removing entries
//! older than the TTL. Not suitable for multi-instance deployments; there is
//! no shared state.

use crate::cache::{DedupStore, IgnoreSource};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default retention window for seen killmail ids.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub struct MemoryStore {
    ttl: Duration,
    items: Mutex<HashMap<String, Instant>>,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Number of ids currently retained.
    pub fn len(&self) -> usize {
        self.items.lock().expect("dedup map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(items: &mut HashMap<String, Instant>, ttl: Duration, now: Instant) {
        items.retain(|_, added| now.duration_since(*added) < ttl);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_TTL)
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn add(&self, id: &str) -> Result<()> {
        let mut items = self.items.lock().expect("dedup map lock poisoned");
        let now = Instant::now();
        items.entry(id.to_owned()).or_insert(now);
        Self::evict(&mut items, self.ttl, now);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let items = self.items.lock().expect("dedup map lock poisoned");
        Ok(items.contains_key(id))
    }
}

/// The in-process backend carries no external state, so its ignore-lists are
/// always empty.
#[async_trait]
impl IgnoreSource for MemoryStore {
    async fn ignored_system_ids(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn ignored_system_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn ignored_region_ids(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
