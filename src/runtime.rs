//! Configuration, composition root, and observability plumbing.

pub mod config;
pub mod monitor;
pub mod runner;

pub use config::{CacheEngine, WatcherConfig, WatcherConfigBuilder};
pub use monitor::{init_tracing, BackpressureMonitor};
pub use runner::Runner;
