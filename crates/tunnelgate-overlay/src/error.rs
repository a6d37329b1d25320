//! Overlay errors

use thiserror::Error;

/// Errors reported by overlay collaborators
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Endpoint creation failed: {0}")]
    Creation(String),

    #[error("Endpoint closed")]
    Closed,

    #[error("Descriptor update rejected: {0}")]
    Descriptor(String),

    #[error("Coordinator error: {0}")]
    Coordinator(String),

    #[error("Duplicate relay region: {0}")]
    DuplicateRegion(u16),

    #[error("Invalid relay region id: {0}")]
    InvalidRegion(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OverlayResult<T> = Result<T, OverlayError>;
