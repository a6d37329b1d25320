//! Cancellation-aware stream adapter

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Wraps a duplex stream so that any I/O error cancels `token`
///
/// Errors never close the stream; [`CancelOnError::close`] does, after
/// cancelling the token.
pub struct CancelOnError<S> {
    inner: S,
    token: CancellationToken,
    closed: bool,
}

impl<S> CancelOnError<S> {
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            closed: false,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn observe<T>(&self, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if let Poll::Ready(Err(_)) = &poll {
            self.token.cancel();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> CancelOnError<S> {
    /// Cancel the token, then shut the stream down. Idempotent.
    pub async fn close(&mut self) -> io::Result<()> {
        self.token.cancel();
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CancelOnError<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        this.observe(poll)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CancelOnError<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.observe(poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.observe(poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.observe(poll)
    }
}
