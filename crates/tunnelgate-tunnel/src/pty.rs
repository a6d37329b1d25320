//! Reconnecting PTY streams over a tunnel connection

use crate::error::TunnelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tunnelgate_overlay::BoxedStream;
use uuid::Uuid;

/// Init header sent to the agent when opening a reconnecting PTY
///
/// `id` is the reconnect key; reusing it lets the agent resume the terminal
/// buffer of an earlier session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyInit {
    #[serde(rename = "ID")]
    pub id: Uuid,
    #[serde(rename = "Height")]
    pub height: u16,
    #[serde(rename = "Width")]
    pub width: u16,
    #[serde(rename = "Command")]
    pub command: String,
}

impl PtyInit {
    /// Encode as a 2-byte little-endian length followed by the JSON body
    pub fn encode(&self) -> Result<Vec<u8>, TunnelError> {
        let body = serde_json::to_vec(self)?;
        let len = u16::try_from(body.len()).map_err(|_| TunnelError::InitTooLarge(body.len()))?;
        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

/// Opens reconnecting PTY streams on an agent
#[async_trait]
pub trait PtyDialer: Send + Sync {
    async fn reconnecting_pty(&self, init: &PtyInit) -> Result<BoxedStream, TunnelError>;
}
