//! Composition root and control loop.
//!
//! The runner owns every long-lived component — dedup backend, roster
//! registry, fetch pipeline, backpressure monitor — and drives the periodic
//! refresh/fetch cycle. Components are constructed here and injected, with
//! lifetimes tied to the runner's scope.

use crate::cache::{DedupStore, IgnoreSource, MemoryStore, RedictStore};
use crate::pipeline::{Killmail, KillmailPipeline};
use crate::roster::{RegionMap, SystemRegistry};
use crate::runtime::config::{CacheEngine, WatcherConfig};
use crate::runtime::monitor::{spawn_monitor_reporter, BackpressureMonitor};
use crate::sources::{HttpRosterSource, KillboardClient, SourceClient};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Coordinates the watcher lifecycle and handles OS signals for graceful
/// shutdowns. In-flight fetches observe the shutdown token and abort their
/// outbound calls promptly.
pub struct Runner {
    config: WatcherConfig,
    registry: SystemRegistry<HttpRosterSource>,
    pipeline: KillmailPipeline,
    monitor: Arc<BackpressureMonitor>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Builds the full component graph from the configuration and returns
    /// the runner together with the receiving end of the output channel.
    pub async fn new(config: WatcherConfig) -> Result<(Self, mpsc::UnboundedReceiver<Killmail>)> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let monitor = Arc::new(BackpressureMonitor::new());

        let (dedup, ignores): (Arc<dyn DedupStore>, Arc<dyn IgnoreSource>) =
            match config.cache_engine() {
                CacheEngine::Memory => {
                    let store = Arc::new(MemoryStore::new(config.memory_ttl()));
                    (store.clone(), store)
                }
                CacheEngine::Redict => {
                    let store = Arc::new(
                        RedictStore::connect(
                            config.redict_address(),
                            config.redict_prefix(),
                            config.redict_ttl(),
                        )
                        .await
                        .context("failed to initialize redict backend")?,
                    );
                    (store.clone(), store)
                }
            };

        let client = SourceClient::new(&config.user_agent(), config.http_timeout())?;

        let roster_source = HttpRosterSource::new(
            client.clone(),
            config.roster_url(),
            config.map_slug(),
            config.roster_token(),
            shutdown.clone(),
        );
        let registry = SystemRegistry::new(
            roster_source,
            ignores,
            RegionMap::new(config.region_map().iter().copied()),
            config.roster_filter(),
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let source = Arc::new(KillboardClient::new(
            client,
            config.killboard_url(),
            config.esi_url(),
        ));
        let pipeline = KillmailPipeline::new(
            source,
            dedup,
            monitor.clone(),
            out_tx,
            config.fetch_window(),
            config.cache_enabled(),
            config.fetch_concurrency(),
        );

        Ok((
            Self {
                config,
                registry,
                pipeline,
                monitor,
                shutdown,
            },
            out_rx,
        ))
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The shared backpressure monitor, so the delivery stage can report
    /// handled records back.
    pub fn monitor(&self) -> Arc<BackpressureMonitor> {
        self.monitor.clone()
    }

    /// Runs the refresh/fetch loop until the shutdown token is cancelled.
    ///
    /// The initial roster update must succeed; later update and fetch
    /// failures are logged and retried on the next tick.
    pub async fn run(&mut self) -> Result<()> {
        self.registry
            .update()
            .await
            .context("initial roster update failed")?;

        let reporter = spawn_monitor_reporter(
            self.monitor.clone(),
            self.shutdown.clone(),
            self.config.monitor_interval(),
        );

        tracing::info!(
            interval = ?self.config.refresh_interval(),
            "starting watcher loop"
        );

        self.fetch_cycle().await;

        let mut ticker = time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("watcher shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.registry.update().await {
                        Ok(changed) => {
                            tracing::debug!(changed, "roster refreshed");
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to update systems");
                        }
                    }
                    self.fetch_cycle().await;
                }
            }
        }

        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "backpressure reporter task panicked");
        }

        tracing::info!("watcher stopped");
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received; shutting down watcher");
                shutdown.cancel();
            }
        });

        self.run().await
    }

    async fn fetch_cycle(&self) {
        let roster = self.registry.snapshot();
        if roster.is_empty() {
            tracing::debug!("roster is empty; skipping fetch cycle");
            return;
        }

        if let Err(err) = self.pipeline.fetch(&roster, &self.shutdown).await {
            tracing::error!(error = %err, "fetch cycle completed with errors");
        }

        self.monitor.log();
    }
}
