//! Overlay network contracts
//!
//! This crate defines the narrow interfaces the gateway consumes from the
//! overlay network: endpoint creation and configuration, the embedded relay
//! server, and the coordinator that exchanges peer descriptors with agents.
//! Implementations live outside this workspace; everything here is plumbing
//! types and traits.

pub mod address;
pub mod agent;
pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod relay_map;
pub mod stream;

pub use address::{
    host_prefix, is_overlay_address, random_address, AGENT_ADDR, RECONNECTING_PTY_PORT,
};
pub use agent::AgentId;
pub use descriptor::Descriptor;
pub use endpoint::{
    Coordinator, EndpointFactory, EndpointOptions, OverlayEndpoint, RegionDialer,
    RegionDialerChain, RelayServer,
};
pub use error::{OverlayError, OverlayResult};
pub use relay_map::{RelayMap, RelayNode, RelayRegion};
pub use stream::{AsyncStream, BoxedStream};
