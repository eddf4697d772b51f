//! Error types for MJPEG stream sessions.

use thiserror::Error;

/// Everything that can end a stream session or prevent one from starting.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The byte source could not be opened (bad address, refused connection,
    /// non-success status).
    #[error("connection error: {0}")]
    Connection(String),

    /// The content-type metadata is missing or carries no usable boundary.
    #[error("invalid content-type header: {0}. The camera is likely not returning a proper MJPEG stream")]
    HeaderFormat(String),

    /// Read failure in the middle of a session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame being assembled would not fit the working buffer.
    #[error("frame of at least {size} bytes exceeds working buffer capacity of {capacity} bytes")]
    Capacity { size: usize, capacity: usize },

    /// `start` was called while a session is still active.
    #[error("a stream session is already active")]
    AlreadyActive,
}

/// Result type alias using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
