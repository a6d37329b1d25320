//! Peer descriptor channel between the overlay endpoint and the coordinator
//!
//! Descriptors travel as newline-delimited JSON arrays. Locally produced
//! updates arrive on the endpoint's sink queue and are written toward the
//! coordinator; batches read from the coordinator are applied to the endpoint
//! with `replace = true`. One task serves both directions so ordering within a
//! direction follows the order of arrival.

use crate::error::TunnelError;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tunnelgate_overlay::{Descriptor, OverlayEndpoint};

const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub struct DescriptorChannel<T> {
    endpoint: Arc<dyn OverlayEndpoint>,
    transport: T,
    outbound: mpsc::UnboundedReceiver<Vec<Descriptor>>,
    token: CancellationToken,
}

impl<T> DescriptorChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        endpoint: Arc<dyn OverlayEndpoint>,
        transport: T,
        outbound: mpsc::UnboundedReceiver<Vec<Descriptor>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            transport,
            outbound,
            token,
        }
    }

    /// Pump descriptors in both directions until either side closes or the
    /// token is cancelled
    pub async fn run(self) -> Result<(), TunnelError> {
        let Self {
            endpoint,
            transport,
            mut outbound,
            token,
        } = self;

        let (read_half, write_half) = tokio::io::split(transport);
        let mut reader =
            FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut writer = FramedWrite::new(write_half, LinesCodec::new());
        let mut local_open = true;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::trace!("Descriptor channel cancelled");
                    break;
                }
                update = outbound.recv(), if local_open => match update {
                    Some(batch) => {
                        let line = serde_json::to_string(&batch)?;
                        tracing::trace!(count = batch.len(), "Sending local descriptors");
                        writer
                            .send(line)
                            .await
                            .map_err(|e| TunnelError::Descriptor(e.to_string()))?;
                    }
                    None => {
                        tracing::trace!("Endpoint descriptor queue closed");
                        local_open = false;
                    }
                },
                line = reader.next() => match line {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let batch: Vec<Descriptor> = serde_json::from_str(&line)?;
                        tracing::trace!(count = batch.len(), "Applying remote descriptors");
                        endpoint
                            .update_descriptors(batch, true)
                            .await
                            .map_err(|e| TunnelError::Descriptor(e.to_string()))?;
                    }
                    Some(Err(e)) => return Err(TunnelError::Descriptor(e.to_string())),
                    None => {
                        tracing::trace!("Coordinator side of descriptor channel closed");
                        break;
                    }
                },
            }
        }

        let _ = SinkExt::<String>::close(&mut writer).await;
        Ok(())
    }
}
