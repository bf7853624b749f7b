//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("unexpected status {status} for {context}")]
    Status { status: u16, context: String },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server violated the request/response protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Path outside the served tree or otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] chunkscope_core::Error),
}

impl From<Error> for chunkscope_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::CoreError(inner) => inner,
            Error::Status { status: 404, context } => Self::NotFound(context),
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Self::NotFound(io.to_string())
            }
            Error::InvalidPath(path) => Self::NotFound(path),
            Error::Json(e) => Self::InvalidData(e.to_string()),
            Error::Protocol(msg) => Self::InvalidData(msg),
            other => Self::transport("io", other),
        }
    }
}
