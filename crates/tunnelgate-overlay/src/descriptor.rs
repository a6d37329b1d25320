//! Peer descriptors exchanged through the coordinator

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Addressing and route record describing how to reach one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Peer identifier assigned by the overlay
    pub id: u64,
    /// Public node key
    pub key: String,
    /// Discovery key used for path probing
    #[serde(default)]
    pub disco: String,
    /// Relay region the peer prefers, 0 when none
    #[serde(default)]
    pub preferred_relay: u16,
    /// Measured latency per relay region, in seconds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relay_latency: BTreeMap<String, f64>,
    /// Virtual addresses assigned to the peer
    #[serde(default)]
    pub addresses: Vec<IpNet>,
    /// Prefixes routed to the peer
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    /// Physical endpoints (ip:port) the peer can be reached on directly
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl Descriptor {
    pub fn new(id: u64, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            disco: String::new(),
            preferred_relay: 0,
            relay_latency: BTreeMap::new(),
            addresses: Vec::new(),
            allowed_ips: Vec::new(),
            endpoints: Vec::new(),
        }
    }
}
