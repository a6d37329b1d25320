//! Traits for the overlay collaborators

use crate::agent::AgentId;
use crate::descriptor::Descriptor;
use crate::error::OverlayResult;
use crate::relay_map::{RelayMap, RelayRegion};
use crate::stream::BoxedStream;
use async_trait::async_trait;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Options for creating an overlay endpoint
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Local virtual addresses the endpoint binds
    pub addresses: Vec<IpNet>,
    /// Relay regions the endpoint may use
    pub relay_map: Arc<RelayMap>,
}

/// Creates overlay endpoints
#[async_trait]
pub trait EndpointFactory: Send + Sync {
    async fn create(&self, options: EndpointOptions) -> OverlayResult<Arc<dyn OverlayEndpoint>>;
}

/// A virtual network interface participating in the overlay
#[async_trait]
pub trait OverlayEndpoint: Send + Sync {
    /// Addresses assigned at creation
    fn addresses(&self) -> Vec<IpNet>;

    /// Install the strategy consulted when a relay region must be dialed
    fn set_region_dialer(&self, dialer: Arc<dyn RegionDialer>);

    /// Install the queue that receives this endpoint's own descriptor updates
    ///
    /// Every locally produced update is pushed onto `sink` in production order.
    fn set_descriptor_sink(&self, sink: mpsc::UnboundedSender<Vec<Descriptor>>);

    /// Apply descriptors of remote peers
    async fn update_descriptors(&self, descriptors: Vec<Descriptor>, replace: bool)
        -> OverlayResult<()>;

    /// Wait until the destination peer answers
    ///
    /// Returns false once the endpoint gives up. Callers bound the wait with
    /// their own deadline.
    async fn await_reachable(&self) -> bool;

    /// Open a TCP stream to a virtual address
    async fn dial_tcp(&self, addr: SocketAddr) -> OverlayResult<BoxedStream>;

    /// Shut down the endpoint
    async fn close(&self);
}

/// Strategy for producing a transport to a relay region
///
/// Returns `None` when this strategy does not handle the region, letting the
/// endpoint fall back to the next strategy or its default behavior.
pub trait RegionDialer: Send + Sync {
    fn dial_region(&self, region: &RelayRegion) -> Option<BoxedStream>;
}

/// Consults several region dialers in order; the first transport wins
#[derive(Clone, Default)]
pub struct RegionDialerChain {
    dialers: Vec<Arc<dyn RegionDialer>>,
}

impl RegionDialerChain {
    pub fn new(dialers: Vec<Arc<dyn RegionDialer>>) -> Self {
        Self { dialers }
    }

    pub fn push(&mut self, dialer: Arc<dyn RegionDialer>) {
        self.dialers.push(dialer);
    }

    pub fn len(&self) -> usize {
        self.dialers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialers.is_empty()
    }
}

impl RegionDialer for RegionDialerChain {
    fn dial_region(&self, region: &RelayRegion) -> Option<BoxedStream> {
        self.dialers.iter().find_map(|d| d.dial_region(region))
    }
}

/// Relay server that can be driven over an arbitrary transport
#[async_trait]
pub trait RelayServer: Send + Sync {
    /// Run the relay protocol on `transport` until it closes or `token` fires
    async fn accept(&self, token: CancellationToken, transport: BoxedStream, tag: &str);
}

/// Coordinator service exchanging descriptors between clients and agents
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Serve the coordinator protocol for one client session
    ///
    /// Blocks until the session ends. Descriptors travel over `transport` as
    /// newline-delimited JSON arrays in both directions.
    async fn serve_client(
        &self,
        transport: BoxedStream,
        session_id: Uuid,
        agent: AgentId,
    ) -> OverlayResult<()>;
}
