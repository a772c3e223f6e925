//! The killmail fetch pipeline: concurrent per-system collection,
//! deduplication, enrichment, and emission onto the output channel.

pub mod fetcher;
pub mod killmail;

pub use fetcher::KillmailPipeline;
pub use killmail::{CharacterInfo, Killmail, ZkillMeta};
