//! The roster of monitored solar systems.

pub mod regions;
pub mod registry;

pub use regions::RegionMap;
pub use registry::{RosterFilter, SystemRegistry};

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// Wormhole systems are named with the J-prefix scheme, e.g. "J123456".
static WH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("J[0-9]{6}").expect("wormhole pattern is valid"));

/// One monitored system. Value type, compared by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub name: String,
    pub solar_system_id: u64,
}

impl System {
    pub fn new(name: impl Into<String>, solar_system_id: u64) -> Self {
        Self {
            name: name.into(),
            solar_system_id,
        }
    }

    /// True when the name identifies a wormhole system.
    pub fn is_wormhole(&self) -> bool {
        WH_PATTERN.is_match(&self.name)
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.solar_system_id, self.name)
    }
}

/// Fetches the authoritative roster from the external map source.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn fetch_systems(&self) -> Result<Vec<System>>;
}
