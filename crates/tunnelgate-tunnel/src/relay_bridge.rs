//! In-process relay bridge
//!
//! A [`RelayBridge`] is a linked pair of duplex ends. One end is driven by the
//! relay server inside a background task, the other is handed to the overlay
//! endpoint as its transport for an embedded relay region. Both ends share a
//! cancellation token: once it fires, reads on either end return EOF and
//! writes fail with `BrokenPipe`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, BufStream, DuplexStream, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tokio_util::task::TaskTracker;
use tunnelgate_overlay::{BoxedStream, RegionDialer, RelayRegion, RelayServer};

const BRIDGE_BUFFER: usize = 64 * 1024;

/// Factory for linked bridge ends
pub struct RelayBridge;

impl RelayBridge {
    /// Create a linked pair closed together when `token` is cancelled
    pub fn pair(token: CancellationToken) -> (BridgeEnd, BridgeEnd) {
        let (left, right) = tokio::io::duplex(BRIDGE_BUFFER);
        (
            BridgeEnd::new(left, token.clone()),
            BridgeEnd::new(right, token),
        )
    }
}

/// One end of a [`RelayBridge`]
pub struct BridgeEnd {
    inner: DuplexStream,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl BridgeEnd {
    fn new(inner: DuplexStream, token: CancellationToken) -> Self {
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self {
            inner,
            token,
            cancelled,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close both ends of the bridge
    pub fn close(&self) {
        self.token.cancel();
    }

    fn poll_closed(&mut self, cx: &mut Context<'_>) -> bool {
        self.cancelled.as_mut().poll(cx).is_ready()
    }
}

impl AsyncRead for BridgeEnd {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_closed(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for BridgeEnd {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.poll_closed(cx) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_closed(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_closed(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Region dialer serving embedded relay regions from an in-process relay
///
/// Regions without `embedded_relay` are left to the next strategy.
pub struct EmbeddedRelayDialer {
    relay: Arc<dyn RelayServer>,
    token: CancellationToken,
    tasks: TaskTracker,
    tag: String,
}

impl EmbeddedRelayDialer {
    pub fn new(
        relay: Arc<dyn RelayServer>,
        token: CancellationToken,
        tasks: TaskTracker,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            relay,
            token,
            tasks,
            tag: tag.into(),
        }
    }
}

impl RegionDialer for EmbeddedRelayDialer {
    fn dial_region(&self, region: &RelayRegion) -> Option<BoxedStream> {
        if !region.embedded_relay {
            return None;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    region_id = region.region_id,
                    "Cannot start embedded relay outside a runtime: {}",
                    e
                );
                return None;
            }
        };

        let bridge_token = self.token.child_token();
        let (relay_end, endpoint_end) = RelayBridge::pair(bridge_token.clone());

        let relay = self.relay.clone();
        let token = self.token.clone();
        let tag = self.tag.clone();
        let region_id = region.region_id;
        self.tasks.spawn_on(
            async move {
                // Closes both ends however the relay exits
                let _guard = bridge_token.drop_guard();
                tracing::debug!(region_id, tag = %tag, "Embedded relay session started");
                let transport: BoxedStream = Box::new(BufStream::new(relay_end));
                tokio::select! {
                    _ = relay.accept(token.clone(), transport, &tag) => {}
                    _ = token.cancelled() => {}
                }
                tracing::debug!(region_id, "Embedded relay session ended");
            },
            &handle,
        );

        Some(Box::new(endpoint_end))
    }
}
