//! Tunnel errors

use thiserror::Error;
use tunnelgate_overlay::{AgentId, OverlayError};

/// Errors produced while dialing, caching or using tunnel connections
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Failed to create overlay endpoint: {0}")]
    Creation(#[source] OverlayError),

    #[error("Agent not reachable: {agent}")]
    Unreachable { agent: AgentId },

    #[error("Coordinator session failed: {0}")]
    Coordinator(#[source] OverlayError),

    #[error("Descriptor channel error: {0}")]
    Descriptor(String),

    #[error("Failed to open stream: {0}")]
    OpenStream(#[source] OverlayError),

    #[error("PTY init header too large: {0} bytes")]
    InitTooLarge(usize),

    #[error("Connection closed")]
    Closed,

    #[error("Connection cache closed")]
    CacheClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TunnelError {
    fn from(e: serde_json::Error) -> Self {
        TunnelError::Descriptor(e.to_string())
    }
}
