//! Backpressure accounting and observability helpers.
//!
//! The monitor is a diagnostic instrument layered over the pipeline, not a
//! limiter: it tracks named in-flight counts so operators can see where work
//! piles up, and performs no admission control.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval for the periodic backpressure report.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// Honours `RUST_LOG` when present, otherwise falls back to `info`. Calling
/// this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Named in-flight gauges, created lazily on first use.
#[derive(Debug, Default)]
pub struct BackpressureMonitor {
    services: Mutex<HashMap<String, u64>>,
}

impl BackpressureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increase(&self, service: &str) {
        let mut services = self.services.lock().expect("monitor lock poisoned");
        let count = services.entry(service.to_owned()).or_insert(0);
        *count += 1;
        tracing::debug!(service, count = *count, "increased backpressure");
    }

    /// Decrements the named counter. Missing or zero counters are left
    /// untouched; a count never goes negative.
    pub fn decrease(&self, service: &str) {
        let mut services = self.services.lock().expect("monitor lock poisoned");
        match services.get_mut(service) {
            Some(count) if *count > 0 => {
                *count -= 1;
                tracing::debug!(service, count = *count, "decreased backpressure");
            }
            _ => {}
        }
    }

    /// Returns a guard that decrements `service` when dropped, so the
    /// release happens on every exit path of the guarded scope.
    pub fn guard<'a>(&'a self, service: &'static str) -> CounterGuard<'a> {
        self.increase(service);
        CounterGuard {
            monitor: self,
            service,
        }
    }

    /// All counters, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let services = self.services.lock().expect("monitor lock poisoned");
        let mut entries: Vec<(String, u64)> = services
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Emits one event with every counter plus runtime task statistics.
    pub fn log(&self) {
        let rendered = self
            .snapshot()
            .into_iter()
            .map(|(name, count)| format!("{name}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let metrics = handle.metrics();
                tracing::info!(
                    services = format!("[{rendered}]"),
                    workers = metrics.num_workers(),
                    alive_tasks = metrics.num_alive_tasks(),
                    "backpressure status"
                );
            }
            Err(_) => {
                tracing::info!(services = format!("[{rendered}]"), "backpressure status");
            }
        }
    }
}

/// Drop guard returned by [`BackpressureMonitor::guard`].
pub struct CounterGuard<'a> {
    monitor: &'a BackpressureMonitor,
    service: &'static str,
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.monitor.decrease(self.service);
    }
}

/// Spawns a background task that logs the backpressure snapshot on an
/// interval until the token is cancelled.
pub fn spawn_monitor_reporter(
    monitor: Arc<BackpressureMonitor>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("backpressure reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    monitor.log();
                }
            }
        }
    })
}
