//! Killmail record types shared by the fetch pipeline and its consumers.
//!
//! A [`Killmail`] is decoded from the killboard page feed, enriched in place
//! with attacker/victim detail from the enrichment API, and is immutable once
//! it has been handed to the output channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single reported kill with its participants and provenance metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Killmail {
    #[serde(default)]
    pub killmail_id: u64,
    #[serde(default)]
    pub attackers: Vec<CharacterInfo>,
    #[serde(default)]
    pub victim: CharacterInfo,
    /// Origin timestamp reported by the enrichment API.
    #[serde(default)]
    pub killmail_time: Option<DateTime<Utc>>,
    #[serde(rename = "zkb", default)]
    pub zkill: ZkillMeta,
}

/// Provenance block attached by the killboard feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZkillMeta {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub npc: bool,
}

/// Affiliation IDs of one participant. Missing fields decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    #[serde(default)]
    pub character_id: u64,
    #[serde(default)]
    pub corporation_id: u64,
    #[serde(default)]
    pub alliance_id: u64,
}

impl CharacterInfo {
    /// True when all three affiliation IDs are zero. Such attacker entries
    /// carry no attributable identity and are dropped during enrichment.
    pub fn is_unattributed(&self) -> bool {
        self.character_id == 0 && self.corporation_id == 0 && self.alliance_id == 0
    }
}

impl Killmail {
    /// Cache key for the dedup store: the decimal form of the killmail id.
    pub fn dedup_key(&self) -> String {
        self.killmail_id.to_string()
    }

    /// Minutes elapsed between the origin timestamp and now, if known.
    pub fn deviation_minutes(&self) -> Option<i64> {
        self.killmail_time
            .map(|origin| (Utc::now() - origin).num_minutes())
    }
}
