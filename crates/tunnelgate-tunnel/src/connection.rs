//! Live tunnel connection to one agent

use crate::error::TunnelError;
use crate::pty::{PtyDialer, PtyInit};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tunnelgate_overlay::{AgentId, BoxedStream, OverlayEndpoint, AGENT_ADDR, RECONNECTING_PTY_PORT};

/// A dialed route to an agent
///
/// Owns the overlay endpoint and every background task started while
/// dialing. Clones share the same underlying connection. Closing is
/// idempotent and safe to race with the coordinator task closing it.
#[derive(Clone)]
pub struct TunnelConnection {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    agent: AgentId,
    endpoint: Arc<dyn OverlayEndpoint>,
    token: CancellationToken,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl Inner {
    /// Cancel the dial context and close the endpoint, once
    ///
    /// Does not join background tasks, so it may run from inside one.
    pub(crate) async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!(agent_id = %self.agent, "Closing tunnel connection");
        self.token.cancel();
        self.endpoint.close().await;
        self.tasks.close();
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropped without close: release the endpoint in the background
        let endpoint = self.endpoint.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { endpoint.close().await });
        }
    }
}

impl TunnelConnection {
    pub(crate) fn new(
        agent: AgentId,
        endpoint: Arc<dyn OverlayEndpoint>,
        token: CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent,
                endpoint,
                token,
                tasks,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub fn agent(&self) -> AgentId {
        self.inner.agent
    }

    pub fn endpoint(&self) -> &Arc<dyn OverlayEndpoint> {
        &self.inner.endpoint
    }

    /// Whether the connection has been closed or its dial context cancelled
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.token.is_cancelled()
    }

    /// Resolves once the connection stops being usable
    pub async fn closed(&self) {
        self.inner.token.cancelled().await;
    }

    /// Release every dial-time resource and wait for background tasks
    pub async fn close(&self) {
        self.inner.shutdown().await;
        self.inner.tasks.wait().await;
    }
}

#[async_trait]
impl PtyDialer for TunnelConnection {
    async fn reconnecting_pty(&self, init: &PtyInit) -> Result<BoxedStream, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::Closed);
        }

        let header = init.encode()?;
        let addr = SocketAddr::new(IpAddr::V6(AGENT_ADDR), RECONNECTING_PTY_PORT);
        let mut stream = self
            .inner
            .endpoint
            .dial_tcp(addr)
            .await
            .map_err(TunnelError::OpenStream)?;

        stream.write_all(&header).await?;
        stream.flush().await?;

        tracing::debug!(
            agent_id = %self.inner.agent,
            reconnect = %init.id,
            height = init.height,
            width = init.width,
            "Opened reconnecting PTY"
        );
        Ok(stream)
    }
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("agent", &self.inner.agent)
            .field("closed", &self.is_closed())
            .finish()
    }
}
