pub mod cache;
pub mod pipeline;
pub mod roster;
pub mod runtime;
pub mod sources;

pub use cache::{DedupStore, IgnoreSource, MemoryStore, RedictStore};
pub use pipeline::{CharacterInfo, Killmail, KillmailPipeline, ZkillMeta};
pub use roster::{RegionMap, RosterProvider, System, SystemRegistry};
pub use runtime::{init_tracing, BackpressureMonitor, CacheEngine, Runner, WatcherConfig};
pub use sources::{HttpRosterSource, KillboardClient, KillmailSource, SourceClient};
