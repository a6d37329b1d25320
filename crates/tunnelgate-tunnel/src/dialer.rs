//! Tunnel dialer
//!
//! Produces a live [`TunnelConnection`] to an agent: creates an overlay
//! endpoint on a fresh virtual address, wires the embedded relay fallback,
//! exchanges descriptors with the coordinator and waits for the agent to
//! become reachable.

use crate::connection::TunnelConnection;
use crate::descriptors::DescriptorChannel;
use crate::error::TunnelError;
use crate::relay_bridge::EmbeddedRelayDialer;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tunnelgate_overlay::{
    host_prefix, random_address, AgentId, BoxedStream, Coordinator, EndpointFactory,
    EndpointOptions, RegionDialer, RegionDialerChain, RelayMap, RelayServer,
};
use uuid::Uuid;

const DESCRIPTOR_BUFFER: usize = 64 * 1024;

/// Dialer tunables
#[derive(Clone)]
pub struct DialerConfig {
    /// Upper bound on the reachability wait
    pub reachable_timeout: Duration,
    /// Tag passed to the relay server for embedded relay sessions
    pub relay_tag: String,
    /// Region dialers consulted after the embedded relay
    pub extra_region_dialers: Vec<Arc<dyn RegionDialer>>,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            reachable_timeout: Duration::from_secs(30),
            relay_tag: "internal".to_string(),
            extra_region_dialers: Vec::new(),
        }
    }
}

/// Dials agents over the overlay network
pub struct TunnelDialer {
    factory: Arc<dyn EndpointFactory>,
    coordinator: Arc<dyn Coordinator>,
    relay: Arc<dyn RelayServer>,
    relay_map: Arc<RelayMap>,
    shutdown: CancellationToken,
    config: DialerConfig,
}

impl TunnelDialer {
    /// Create a dialer
    ///
    /// Cancelling `shutdown` tears down the background tasks of every
    /// connection produced by this dialer.
    pub fn new(
        factory: Arc<dyn EndpointFactory>,
        coordinator: Arc<dyn Coordinator>,
        relay: Arc<dyn RelayServer>,
        relay_map: Arc<RelayMap>,
        shutdown: CancellationToken,
        config: DialerConfig,
    ) -> Self {
        Self {
            factory,
            coordinator,
            relay,
            relay_map,
            shutdown,
            config,
        }
    }

    pub fn relay_map(&self) -> &Arc<RelayMap> {
        &self.relay_map
    }

    /// Dial an agent
    ///
    /// On error nothing allocated during the dial stays open.
    pub async fn dial(&self, agent: AgentId) -> Result<TunnelConnection, TunnelError> {
        let address = random_address();
        tracing::debug!(agent_id = %agent, address = %address, "Dialing agent");

        let endpoint = self
            .factory
            .create(EndpointOptions {
                addresses: vec![host_prefix(IpAddr::V6(address))],
                relay_map: self.relay_map.clone(),
            })
            .await
            .map_err(TunnelError::Creation)?;

        let token = self.shutdown.child_token();
        let tasks = TaskTracker::new();

        let embedded: Arc<dyn RegionDialer> = Arc::new(EmbeddedRelayDialer::new(
            self.relay.clone(),
            token.clone(),
            tasks.clone(),
            self.config.relay_tag.clone(),
        ));
        let mut region_dialer = RegionDialerChain::new(vec![embedded]);
        for extra in &self.config.extra_region_dialers {
            region_dialer.push(extra.clone());
        }
        endpoint.set_region_dialer(Arc::new(region_dialer));

        let (client_end, server_end) = tokio::io::duplex(DESCRIPTOR_BUFFER);
        let (sink, outbound) = mpsc::unbounded_channel();
        endpoint.set_descriptor_sink(sink);

        let channel = DescriptorChannel::new(endpoint.clone(), client_end, outbound, token.clone());
        tasks.spawn(async move {
            if let Err(e) = channel.run().await {
                tracing::debug!(agent_id = %agent, "Descriptor channel ended: {}", e);
            }
        });

        let conn = TunnelConnection::new(agent, endpoint, token.clone(), tasks.clone());
        self.spawn_coordinator(&conn, &tasks, &token, Box::new(server_end));

        let reachable = tokio::select! {
            result = tokio::time::timeout(
                self.config.reachable_timeout,
                conn.endpoint().await_reachable(),
            ) => result.unwrap_or(false),
            _ = token.cancelled() => false,
        };

        if !reachable {
            tracing::debug!(agent_id = %agent, "Agent not reachable, closing");
            conn.close().await;
            return Err(TunnelError::Unreachable { agent });
        }

        tracing::info!(agent_id = %agent, "Agent reachable");
        Ok(conn)
    }

    fn spawn_coordinator(
        &self,
        conn: &TunnelConnection,
        tasks: &TaskTracker,
        token: &CancellationToken,
        transport: BoxedStream,
    ) {
        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown.clone();
        let token = token.clone();
        let weak = conn.downgrade();
        let agent = conn.agent();
        let session_id = Uuid::new_v4();

        tasks.spawn(async move {
            let result = tokio::select! {
                result = coordinator.serve_client(transport, session_id, agent) => result,
                _ = token.cancelled() => return,
            };

            match result {
                Ok(()) => {
                    tracing::debug!(agent_id = %agent, session_id = %session_id, "Coordinator session ended");
                }
                Err(e) => {
                    if !shutdown.is_cancelled() {
                        tracing::warn!(
                            agent_id = %agent,
                            session_id = %session_id,
                            "Coordinator session failed: {}",
                            TunnelError::Coordinator(e)
                        );
                    }
                    if let Some(inner) = weak.upgrade() {
                        inner.shutdown().await;
                    }
                }
            }
        });
    }
}
