//! Static system-to-region lookup.
//!
//! The map source reports systems without region information, so region
//! based ignore rules need a side table. The table is supplied through
//! configuration; systems missing from it simply never match a region rule.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    by_system: HashMap<u64, u64>,
}

impl RegionMap {
    pub fn new(pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            by_system: pairs.into_iter().collect(),
        }
    }

    pub fn region_of(&self, solar_system_id: u64) -> Option<u64> {
        self.by_system.get(&solar_system_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_system.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_system.is_empty()
    }
}
