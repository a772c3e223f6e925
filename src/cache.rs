//! Duplicate-suppression storage for killmail ids, plus the externally
//! managed ignore-lists that live alongside it.
//!
//! Two interchangeable backends implement [`DedupStore`]: an in-process map
//! with lazy TTL eviction ([`MemoryStore`]) and a Redict/Redis keyspace with
//! native expiry ([`RedictStore`]). Callers are expected to fail open on
//! store errors: a down cache degrades to re-delivery, never to message
//! loss.

pub mod memory;
pub mod redict;

pub use memory::MemoryStore;
pub use redict::RedictStore;

use anyhow::Result;
use async_trait::async_trait;

/// Records killmail ids that have already been processed.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Inserts `id` with the current time. Re-adding an existing id is a
    /// no-op, not an error.
    async fn add(&self, id: &str) -> Result<()>;

    /// Reports whether `id` is present without mutating state.
    async fn exists(&self, id: &str) -> Result<bool>;
}

/// Dynamic ignore-lists maintained outside the process, merged with static
/// configuration on every roster update.
#[async_trait]
pub trait IgnoreSource: Send + Sync {
    async fn ignored_system_ids(&self) -> Result<Vec<String>>;
    async fn ignored_system_names(&self) -> Result<Vec<String>>;
    async fn ignored_region_ids(&self) -> Result<Vec<String>>;
}
