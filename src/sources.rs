//! HTTP collaborators: the map roster source, the killboard page feed, and
//! the enrichment API.

pub mod client;
pub mod killboard;
pub mod roster;

pub use client::SourceClient;
pub use killboard::{KillboardClient, KillmailSource};
pub use roster::HttpRosterSource;
