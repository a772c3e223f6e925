use crate::roster::registry::RosterFilter;
use crate::runtime::monitor;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_KILLBOARD_URL: &str = "https://zkillboard.com";
const DEFAULT_ESI_URL: &str = "https://esi.evetech.net";
const DEFAULT_REDICT_ADDRESS: &str = "redis://127.0.0.1:6379/1";
const DEFAULT_REDICT_PREFIX: &str = "chainwatch";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_FETCH_WINDOW_SECS: u64 = 60 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REDICT_TTL_SECS: u64 = 60 * 60;
const DEFAULT_MEMORY_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_FETCH_CONCURRENCY: usize = 16;

/// Which dedup backend the watcher runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEngine {
    Memory,
    Redict,
}

/// Runtime configuration for the watcher.
///
/// All instances must be constructed via [`WatcherConfig::builder`] so
/// invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    roster_url: String,
    roster_token: String,
    map_slug: String,
    killboard_url: String,
    esi_url: String,
    admin_name: String,
    admin_email: String,
    app_name: String,
    version: String,
    refresh_interval: Duration,
    fetch_window: Duration,
    wormholes_only: bool,
    ignore_system_names: Vec<String>,
    ignore_system_ids: Vec<u64>,
    ignore_region_ids: Vec<u64>,
    region_map: Vec<(u64, u64)>,
    cache_engine: CacheEngine,
    cache_enabled: bool,
    redict_address: String,
    redict_prefix: String,
    redict_ttl: Duration,
    memory_ttl: Duration,
    fetch_concurrency: usize,
    http_timeout: Duration,
    monitor_interval: Duration,
}

impl WatcherConfig {
    /// Returns a builder to incrementally construct and validate a
    /// configuration.
    pub fn builder() -> WatcherConfigBuilder {
        WatcherConfigBuilder::default()
    }

    /// Base URL of the map roster service.
    pub fn roster_url(&self) -> &str {
        &self.roster_url
    }

    /// Bearer token presented to the map roster service.
    pub fn roster_token(&self) -> &str {
        &self.roster_token
    }

    /// Map identifier requested from the roster service.
    pub fn map_slug(&self) -> &str {
        &self.map_slug
    }

    /// Base URL of the killboard page feed.
    pub fn killboard_url(&self) -> &str {
        &self.killboard_url
    }

    /// Base URL of the enrichment API.
    pub fn esi_url(&self) -> &str {
        &self.esi_url
    }

    /// Interval between roster refresh / fetch cycles.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Lookback window requested from the killboard feed.
    pub fn fetch_window(&self) -> Duration {
        self.fetch_window
    }

    pub fn wormholes_only(&self) -> bool {
        self.wormholes_only
    }

    pub fn cache_engine(&self) -> CacheEngine {
        self.cache_engine
    }

    /// Whether the dedup store is consulted at all during fetches.
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn redict_address(&self) -> &str {
        &self.redict_address
    }

    pub fn redict_prefix(&self) -> &str {
        &self.redict_prefix
    }

    /// Retention window for dedup keys in the redict backend.
    pub fn redict_ttl(&self) -> Duration {
        self.redict_ttl
    }

    /// Retention window for dedup entries in the in-process backend.
    pub fn memory_ttl(&self) -> Duration {
        self.memory_ttl
    }

    /// Upper bound on concurrently fetching systems.
    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Interval used by the backpressure reporter.
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    /// User-Agent sent on every outbound request.
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{}:{} {}",
            self.admin_name, self.app_name, self.version, self.admin_email
        )
    }

    /// Static filter rules handed to the roster registry.
    pub fn roster_filter(&self) -> RosterFilter {
        RosterFilter {
            wormholes_only: self.wormholes_only,
            system_names: self.ignore_system_names.clone(),
            system_ids: self.ignore_system_ids.clone(),
            region_ids: self.ignore_region_ids.clone(),
        }
    }

    /// Static system-to-region pairs for the region lookup table.
    pub fn region_map(&self) -> &[(u64, u64)] {
        &self.region_map
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.roster_url, "roster_url")?;
        validate_url(&self.killboard_url, "killboard_url")?;
        validate_url(&self.esi_url, "esi_url")?;
        ensure_not_empty(&self.map_slug, "map_slug")?;
        ensure_not_empty(&self.admin_name, "admin_name")?;
        ensure_not_empty(&self.app_name, "app_name")?;

        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be greater than 0");
        }

        if self.fetch_window.is_zero() {
            bail!("fetch_window must be greater than 0");
        }

        if self.fetch_concurrency == 0 {
            bail!("fetch_concurrency must be greater than 0");
        }

        if self.http_timeout.is_zero() {
            bail!("http_timeout must be greater than 0");
        }

        if self.monitor_interval.is_zero() {
            bail!("monitor_interval must be greater than 0");
        }

        if self.cache_engine == CacheEngine::Redict {
            ensure_not_empty(&self.redict_address, "redict_address")?;
            if self.redict_ttl.is_zero() {
                bail!("redict_ttl must be greater than 0");
            }
        }

        if self.cache_engine == CacheEngine::Memory && self.memory_ttl.is_zero() {
            bail!("memory_ttl must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WatcherConfigBuilder {
    roster_url: Option<String>,
    roster_token: Option<String>,
    map_slug: Option<String>,
    killboard_url: Option<String>,
    esi_url: Option<String>,
    admin_name: Option<String>,
    admin_email: Option<String>,
    app_name: Option<String>,
    version: Option<String>,
    refresh_interval: Option<Duration>,
    fetch_window: Option<Duration>,
    wormholes_only: Option<bool>,
    ignore_system_names: Option<Vec<String>>,
    ignore_system_ids: Option<Vec<u64>>,
    ignore_region_ids: Option<Vec<u64>>,
    region_map: Option<Vec<(u64, u64)>>,
    cache_engine: Option<CacheEngine>,
    cache_enabled: Option<bool>,
    redict_address: Option<String>,
    redict_prefix: Option<String>,
    redict_ttl: Option<Duration>,
    memory_ttl: Option<Duration>,
    fetch_concurrency: Option<usize>,
    http_timeout: Option<Duration>,
    monitor_interval: Option<Duration>,
}

impl WatcherConfigBuilder {
    pub fn roster_url(mut self, url: impl Into<String>) -> Self {
        self.roster_url = Some(url.into());
        self
    }

    pub fn roster_token(mut self, token: impl Into<String>) -> Self {
        self.roster_token = Some(token.into());
        self
    }

    pub fn map_slug(mut self, slug: impl Into<String>) -> Self {
        self.map_slug = Some(slug.into());
        self
    }

    pub fn killboard_url(mut self, url: impl Into<String>) -> Self {
        self.killboard_url = Some(url.into());
        self
    }

    pub fn esi_url(mut self, url: impl Into<String>) -> Self {
        self.esi_url = Some(url.into());
        self
    }

    pub fn admin_name(mut self, name: impl Into<String>) -> Self {
        self.admin_name = Some(name.into());
        self
    }

    pub fn admin_email(mut self, email: impl Into<String>) -> Self {
        self.admin_email = Some(email.into());
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn fetch_window(mut self, window: Duration) -> Self {
        self.fetch_window = Some(window);
        self
    }

    pub fn wormholes_only(mut self, enabled: bool) -> Self {
        self.wormholes_only = Some(enabled);
        self
    }

    pub fn ignore_system_names(mut self, names: Vec<String>) -> Self {
        self.ignore_system_names = Some(names);
        self
    }

    pub fn ignore_system_ids(mut self, ids: Vec<u64>) -> Self {
        self.ignore_system_ids = Some(ids);
        self
    }

    pub fn ignore_region_ids(mut self, ids: Vec<u64>) -> Self {
        self.ignore_region_ids = Some(ids);
        self
    }

    pub fn region_map(mut self, pairs: Vec<(u64, u64)>) -> Self {
        self.region_map = Some(pairs);
        self
    }

    pub fn cache_engine(mut self, engine: CacheEngine) -> Self {
        self.cache_engine = Some(engine);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    pub fn redict_address(mut self, address: impl Into<String>) -> Self {
        self.redict_address = Some(address.into());
        self
    }

    pub fn redict_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.redict_prefix = Some(prefix.into());
        self
    }

    pub fn redict_ttl(mut self, ttl: Duration) -> Self {
        self.redict_ttl = Some(ttl);
        self
    }

    pub fn memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    pub fn fetch_concurrency(mut self, limit: usize) -> Self {
        self.fetch_concurrency = Some(limit);
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<WatcherConfig> {
        let config = WatcherConfig {
            roster_url: trimmed(self.roster_url.context("roster_url is required")?),
            roster_token: self.roster_token.unwrap_or_default(),
            map_slug: trimmed(self.map_slug.context("map_slug is required")?),
            killboard_url: trimmed(
                self.killboard_url
                    .unwrap_or_else(|| DEFAULT_KILLBOARD_URL.to_owned()),
            ),
            esi_url: trimmed(self.esi_url.unwrap_or_else(|| DEFAULT_ESI_URL.to_owned())),
            admin_name: trimmed(self.admin_name.context("admin_name is required")?),
            admin_email: self.admin_email.unwrap_or_default(),
            app_name: self
                .app_name
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned()),
            version: self
                .version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
            refresh_interval: self
                .refresh_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS)),
            fetch_window: self
                .fetch_window
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_FETCH_WINDOW_SECS)),
            wormholes_only: self.wormholes_only.unwrap_or(false),
            ignore_system_names: self.ignore_system_names.unwrap_or_default(),
            ignore_system_ids: self.ignore_system_ids.unwrap_or_default(),
            ignore_region_ids: self.ignore_region_ids.unwrap_or_default(),
            region_map: self.region_map.unwrap_or_default(),
            cache_engine: self.cache_engine.unwrap_or(CacheEngine::Redict),
            cache_enabled: self.cache_enabled.unwrap_or(true),
            redict_address: self
                .redict_address
                .unwrap_or_else(|| DEFAULT_REDICT_ADDRESS.to_owned()),
            redict_prefix: self
                .redict_prefix
                .unwrap_or_else(|| DEFAULT_REDICT_PREFIX.to_owned()),
            redict_ttl: self
                .redict_ttl
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REDICT_TTL_SECS)),
            memory_ttl: self
                .memory_ttl
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MEMORY_TTL_SECS)),
            fetch_concurrency: self.fetch_concurrency.unwrap_or(DEFAULT_FETCH_CONCURRENCY),
            http_timeout: self
                .http_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)),
            monitor_interval: self
                .monitor_interval
                .unwrap_or(monitor::DEFAULT_MONITOR_INTERVAL),
        };

        config.validate()?;
        Ok(config)
    }
}

fn trimmed(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
