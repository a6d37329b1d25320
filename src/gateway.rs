//! Gateway assembly and graceful drain

use crate::config::GatewayConfig;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunnelgate_overlay::{Coordinator, EndpointFactory, RelayServer};
use tunnelgate_proxy::{InFlightTracker, PtyProxy, TicketResolver};
use tunnelgate_tunnel::{AgentConnector, ConnectionCache, TunnelDialer};

/// External services the gateway is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub endpoints: Arc<dyn EndpointFactory>,
    pub coordinator: Arc<dyn Coordinator>,
    pub relay: Arc<dyn RelayServer>,
    pub resolver: Arc<dyn TicketResolver>,
}

/// Dialer, connection cache and PTY proxy behind one router
pub struct Gateway {
    config: GatewayConfig,
    cache: ConnectionCache<TunnelDialer>,
    proxy: Arc<PtyProxy>,
    tracker: InFlightTracker,
    sessions: CancellationToken,
    dials: CancellationToken,
}

impl Gateway {
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Result<Self> {
        let relay_map = Arc::new(config.relay_map()?);
        let dials = CancellationToken::new();
        let sessions = CancellationToken::new();
        let tracker = InFlightTracker::new();

        let dialer = TunnelDialer::new(
            collaborators.endpoints,
            collaborators.coordinator,
            collaborators.relay,
            relay_map,
            dials.clone(),
            config.dialer_config(),
        );
        let cache = ConnectionCache::new(dialer, config.idle_timeout());
        let connector: Arc<dyn AgentConnector> = Arc::new(cache.clone());

        let proxy = Arc::new(PtyProxy::new(
            collaborators.resolver,
            connector,
            tracker.clone(),
            sessions.clone(),
            config.proxy_config(),
        ));

        Ok(Self {
            config,
            cache,
            proxy,
            tracker,
            sessions,
            dials,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        self.proxy.clone().router()
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    pub fn cache(&self) -> &ConnectionCache<TunnelDialer> {
        &self.cache
    }

    /// Serve until `shutdown` resolves, then drain
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!("Gateway listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("Gateway server failed")?;

        self.drain().await;
        Ok(())
    }

    /// Wait for live sessions up to the drain timeout, cancel the rest, then
    /// close cached connections
    pub async fn drain(&self) {
        let timeout = self.config.drain_timeout();
        info!(sessions = self.tracker.count(), "Draining sessions");

        if !self.tracker.wait_idle_timeout(timeout).await {
            warn!(
                sessions = self.tracker.count(),
                "Drain timeout elapsed, cancelling remaining sessions"
            );
            self.sessions.cancel();
            if !self.tracker.wait_idle_timeout(timeout).await {
                warn!(sessions = self.tracker.count(), "Sessions still active after cancel");
            }
        }

        self.sessions.cancel();
        self.cache.close().await;
        self.dials.cancel();
        info!("Gateway stopped");
    }
}
