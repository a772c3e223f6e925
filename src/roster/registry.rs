//! Registry of monitored systems with hash-based change detection.
//!
//! The snapshot is replaced wholesale under a mutex; fetch tasks read a
//! copy and never observe element-wise mutation. A non-empty snapshot is
//! never replaced by an empty one — an empty fetch result is treated as a
//! transient failure upstream, not as "zero systems".

use crate::cache::IgnoreSource;
use crate::roster::{RegionMap, RosterProvider, System};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Static filter rules from configuration, merged on every update with the
/// dynamic lists served by the [`IgnoreSource`].
#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
    pub wormholes_only: bool,
    pub system_names: Vec<String>,
    pub system_ids: Vec<u64>,
    pub region_ids: Vec<u64>,
}

#[derive(Default)]
struct Snapshot {
    systems: Vec<System>,
    hash: [u8; 32],
}

pub struct SystemRegistry<R> {
    provider: R,
    ignores: Arc<dyn IgnoreSource>,
    regions: RegionMap,
    filter: RosterFilter,
    inner: Mutex<Snapshot>,
}

struct MergedIgnores {
    names: HashSet<String>,
    system_ids: HashSet<u64>,
    region_ids: HashSet<u64>,
}

impl<R: RosterProvider> SystemRegistry<R> {
    pub fn new(
        provider: R,
        ignores: Arc<dyn IgnoreSource>,
        regions: RegionMap,
        filter: RosterFilter,
    ) -> Self {
        Self {
            provider,
            ignores,
            regions,
            filter,
            inner: Mutex::new(Snapshot {
                systems: Vec::new(),
                hash: list_hash(&[]),
            }),
        }
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> Vec<System> {
        self.inner
            .lock()
            .expect("roster snapshot lock poisoned")
            .systems
            .clone()
    }

    /// Refreshes the roster from the external source.
    ///
    /// Returns `Ok(true)` when the filtered, non-empty list differs from the
    /// current snapshot and replaced it. Network and decode failures abort
    /// the update and leave the snapshot untouched — stale-but-available is
    /// preferred over empty.
    pub async fn update(&self) -> Result<bool> {
        let fetched = self
            .provider
            .fetch_systems()
            .await
            .context("failed to fetch roster from map source")?;

        let ignores = self.merged_ignores().await;

        tracing::debug!(
            wormholes_only = self.filter.wormholes_only,
            fetched = fetched.len(),
            "filtering systems"
        );

        let mut filtered: Vec<System> = Vec::with_capacity(fetched.len());
        for sys in fetched {
            if self.filter.wormholes_only && !sys.is_wormhole() {
                tracing::debug!(
                    system_name = %sys.name,
                    system_id = sys.solar_system_id,
                    "discarding system: wormhole kills only is turned on"
                );
                continue;
            }

            if ignores.names.contains(&sys.name) || ignores.system_ids.contains(&sys.solar_system_id)
            {
                tracing::debug!(
                    system_name = %sys.name,
                    system_id = sys.solar_system_id,
                    "discarding system: on ignore list"
                );
                continue;
            }

            if !ignores.region_ids.is_empty() {
                match self.regions.region_of(sys.solar_system_id) {
                    Some(region_id) if ignores.region_ids.contains(&region_id) => {
                        tracing::debug!(
                            system_name = %sys.name,
                            system_id = sys.solar_system_id,
                            region_id,
                            "discarding system: region is on ignore list"
                        );
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        tracing::debug!(
                            system_id = sys.solar_system_id,
                            "no region mapping for system; region rules skipped"
                        );
                    }
                }
            }

            filtered.push(sys);
        }

        // Stable ordering keeps the hash insensitive to source-side
        // shuffling between calls.
        filtered.sort_by_key(|sys| sys.solar_system_id);
        let new_hash = list_hash(&filtered);

        let mut inner = self.inner.lock().expect("roster snapshot lock poisoned");
        let changed = !filtered.is_empty() && new_hash != inner.hash;
        if changed {
            inner.systems = filtered;
            inner.hash = new_hash;
        }

        tracing::debug!(
            changed,
            system_count = inner.systems.len(),
            "roster update complete"
        );
        Ok(changed)
    }

    async fn merged_ignores(&self) -> MergedIgnores {
        let mut names: HashSet<String> = self.filter.system_names.iter().cloned().collect();
        let mut system_ids: HashSet<u64> = self.filter.system_ids.iter().copied().collect();
        let mut region_ids: HashSet<u64> = self.filter.region_ids.iter().copied().collect();

        match self.ignores.ignored_system_names().await {
            Ok(dynamic) => names.extend(dynamic),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read dynamic system name ignores; using static list only");
            }
        }

        match self.ignores.ignored_system_ids().await {
            Ok(dynamic) => system_ids.extend(parse_ids(dynamic, "system")),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read dynamic system id ignores; using static list only");
            }
        }

        match self.ignores.ignored_region_ids().await {
            Ok(dynamic) => region_ids.extend(parse_ids(dynamic, "region")),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read dynamic region id ignores; using static list only");
            }
        }

        MergedIgnores {
            names,
            system_ids,
            region_ids,
        }
    }
}

fn parse_ids(raw: Vec<String>, kind: &str) -> Vec<u64> {
    raw.into_iter()
        .filter_map(|value| match value.trim().parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = %value, kind, "ignoring malformed id on ignore list");
                None
            }
        })
        .collect()
}

fn list_hash(list: &[System]) -> [u8; 32] {
    // The list is sorted before hashing, so the serialization is canonical.
    let encoded = serde_json::to_vec(list).unwrap_or_default();
    Sha256::digest(&encoded).into()
}
