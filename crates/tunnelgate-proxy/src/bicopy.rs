//! Bidirectional copy between two duplex streams

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Which side ended the copy
#[derive(Debug)]
pub enum BicopyEnd {
    /// Reading `a` finished or failed
    A(io::Result<u64>),
    /// Reading `b` finished or failed
    B(io::Result<u64>),
    Cancelled,
}

/// Copy bytes both ways until either side reaches EOF or errors, or `token`
/// is cancelled
///
/// The direction still in flight is dropped, so nothing more is read or
/// written once one side ends. Closing the streams is left to the caller.
pub async fn bicopy<A, B>(token: &CancellationToken, a: &mut A, b: &mut B) -> BicopyEnd
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let end = tokio::select! {
        result = tokio::io::copy(&mut a_read, &mut b_write) => BicopyEnd::A(result),
        result = tokio::io::copy(&mut b_read, &mut a_write) => BicopyEnd::B(result),
        _ = token.cancelled() => BicopyEnd::Cancelled,
    };
    tracing::trace!(?end, "Bicopy finished");
    end
}
