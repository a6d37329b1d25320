//! Proxy errors

use thiserror::Error;
use tunnelgate_tunnel::TunnelError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("WebSocket closed")]
    Closed,

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
