//! Relay region map

use crate::error::{OverlayError, OverlayResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_relay_port() -> u16 {
    443
}

/// One relay server inside a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayNode {
    pub name: String,
    pub host_name: String,
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
    #[serde(default)]
    pub stun_port: Option<u16>,
}

/// A relay region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRegion {
    pub region_id: u16,
    pub region_code: String,
    #[serde(default)]
    pub region_name: String,
    /// The relay for this region runs inside this process
    #[serde(default)]
    pub embedded_relay: bool,
    #[serde(default)]
    pub nodes: Vec<RelayNode>,
}

/// Relay regions keyed by region id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMap {
    #[serde(default)]
    pub regions: BTreeMap<u16, RelayRegion>,
}

impl RelayMap {
    /// Build a map, rejecting id 0 and duplicate region ids
    pub fn from_regions(regions: impl IntoIterator<Item = RelayRegion>) -> OverlayResult<Self> {
        let mut map = BTreeMap::new();
        for region in regions {
            if region.region_id == 0 {
                return Err(OverlayError::InvalidRegion(region.region_id));
            }
            let id = region.region_id;
            if map.insert(id, region).is_some() {
                return Err(OverlayError::DuplicateRegion(id));
            }
        }
        Ok(Self { regions: map })
    }

    pub fn region(&self, region_id: u16) -> Option<&RelayRegion> {
        self.regions.get(&region_id)
    }

    /// Regions whose relay is served in-process
    pub fn embedded_regions(&self) -> impl Iterator<Item = &RelayRegion> {
        self.regions.values().filter(|r| r.embedded_relay)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
