//! Boxed duplex byte streams handed across the overlay seams

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream that can be moved between tasks
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized {}

pub type BoxedStream = Box<dyn AsyncStream>;
