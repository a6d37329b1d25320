//! Byte-stream view of an upgraded WebSocket
//!
//! The socket is split: a writer task owns the sink and drains a channel fed
//! by both the byte stream and [`WsControl`]; the byte stream reads binary
//! frames straight from the source half.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::{Buf, Bytes};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::PollSender;

use crate::error::ProxyError;

const OUTBOUND_BUFFER: usize = 64;

/// Maximum close reason length allowed by the WebSocket protocol
pub const MAX_CLOSE_REASON: usize = 123;

/// Split an upgraded socket into a byte stream, a control handle and the
/// writer task
pub fn split(socket: WebSocket) -> (WsByteStream, WsControl, JoinHandle<()>) {
    let (sink, source) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(writer_task(sink, rx));

    let stream = WsByteStream {
        inbound: source,
        pending: Bytes::new(),
        outbound: PollSender::new(tx.clone()),
        eof: false,
    };
    (stream, WsControl { tx }, writer)
}

async fn writer_task(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            tracing::debug!("WebSocket send error: {}", e);
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
    tracing::trace!("WebSocket writer task ended");
}

/// Truncate a close reason to the protocol limit on a character boundary
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Sends control frames on the socket
#[derive(Clone)]
pub struct WsControl {
    tx: mpsc::Sender<Message>,
}

impl WsControl {
    pub async fn ping(&self) -> Result<(), ProxyError> {
        self.tx
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|_| ProxyError::Closed)
    }

    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Send a close frame; later frames are discarded
    pub async fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: truncate_reason(reason).to_string().into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame))).await;
    }
}

/// Binary frames as a duplex byte stream
///
/// Text frames are rejected with `InvalidData`; a close frame reads as EOF.
pub struct WsByteStream {
    inbound: SplitStream<WebSocket>,
    pending: Bytes,
    outbound: PollSender<Message>,
    eof: bool,
}

impl AsyncRead for WsByteStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(this.inbound.poll_next_unpin(cx)) {
                Some(Ok(Message::Binary(data))) => this.pending = data,
                Some(Ok(Message::Text(_))) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unexpected text frame",
                    )));
                }
                Some(Ok(Message::Close(_))) | None => this.eof = true,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, e)));
                }
            }
        }
    }
}

impl AsyncWrite for WsByteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.outbound.poll_reserve(cx)).map_err(|_| broken_pipe())?;
        this.outbound
            .send_item(Message::Binary(Bytes::copy_from_slice(buf)))
            .map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Sends a normal close frame unless the socket is already closing
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.outbound.is_closed() {
            return Poll::Ready(Ok(()));
        }
        if ready!(this.outbound.poll_reserve(cx)).is_ok() {
            let frame = CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            };
            let _ = this.outbound.send_item(Message::Close(Some(frame)));
        }
        this.outbound.close();
        Poll::Ready(Ok(()))
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "websocket closed")
}
