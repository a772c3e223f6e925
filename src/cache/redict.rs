//! Redict/Redis dedup backend.
//!
//! Every seen killmail id becomes a value-less key with a native TTL, so
//! expiry needs no sweep and the keyspace is shared across process
//! instances. The same database also holds the operator-managed ignore-list
//! sets consumed by the roster registry.

use crate::cache::{DedupStore, IgnoreSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

const KEY_IGNORED_SYSTEM_IDS: &str = "ignored_system_ids";
const KEY_IGNORED_SYSTEM_NAMES: &str = "ignored_system_names";
const KEY_IGNORED_REGION_IDS: &str = "ignored_region_ids";

#[derive(Clone)]
pub struct RedictStore {
    manager: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl RedictStore {
    /// Connects to the Redict instance at `url` (a `redis://` URL, including
    /// the database index). `ttl` is the retention window for dedup keys;
    /// it is applied with second granularity.
    pub async fn connect(url: &str, prefix: impl Into<String>, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("invalid redict url {url}"))?;
        let manager = ConnectionManager::new(client)
            .await
            .with_context(|| format!("failed to connect to redict at {url}"))?;

        Ok(Self {
            manager,
            prefix: prefix.into(),
            ttl,
        })
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}:{}", self.prefix, name)
        }
    }

    async fn set_members(&self, name: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let key = self.key(name);
        let members: Vec<String> = conn
            .smembers(&key)
            .await
            .with_context(|| format!("failed to read set {key}"))?;
        Ok(members)
    }

    async fn add_member(&self, name: &str, member: String) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = self.key(name);
        conn.sadd::<_, _, ()>(&key, member)
            .await
            .with_context(|| format!("failed to extend set {key}"))?;
        Ok(())
    }

    /// Adds a system id to the dynamic ignore-list.
    pub async fn ignore_system_id(&self, id: u64) -> Result<()> {
        self.add_member(KEY_IGNORED_SYSTEM_IDS, id.to_string()).await
    }

    /// Adds a system name to the dynamic ignore-list.
    pub async fn ignore_system_name(&self, name: &str) -> Result<()> {
        self.add_member(KEY_IGNORED_SYSTEM_NAMES, name.to_owned())
            .await
    }

    /// Adds a region id to the dynamic ignore-list.
    pub async fn ignore_region_id(&self, id: u64) -> Result<()> {
        self.add_member(KEY_IGNORED_REGION_IDS, id.to_string()).await
    }
}

#[async_trait]
impl DedupStore for RedictStore {
    async fn add(&self, id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = self.key(id);
        let ttl_secs = self.ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(&key, "", ttl_secs)
            .await
            .with_context(|| format!("failed to store dedup key {key}"))?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let key = self.key(id);
        // A missing key decodes as None; any other failure is a transport
        // error and surfaces to the caller.
        let value: Option<String> = conn
            .get(&key)
            .await
            .with_context(|| format!("failed to probe dedup key {key}"))?;

        match value {
            Some(_) => {
                tracing::debug!(id, "cache hit");
                Ok(true)
            }
            None => {
                tracing::debug!(id, "cache miss");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl IgnoreSource for RedictStore {
    async fn ignored_system_ids(&self) -> Result<Vec<String>> {
        self.set_members(KEY_IGNORED_SYSTEM_IDS).await
    }

    async fn ignored_system_names(&self) -> Result<Vec<String>> {
        self.set_members(KEY_IGNORED_SYSTEM_NAMES).await
    }

    async fn ignored_region_ids(&self) -> Result<Vec<String>> {
        self.set_members(KEY_IGNORED_REGION_IDS).await
    }
}
