//! Error types for chunkscope-render.

use thiserror::Error;

/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Errors raised by render workers and surfaces.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The worker already owns a surface.
    #[error("canvas already transferred to the render worker")]
    CanvasAlreadyTransferred,

    /// A JSON command had an unknown shape.
    #[error("invalid render command: {0}")]
    InvalidCommand(String),

    /// The worker thread has exited.
    #[error("render worker is no longer running")]
    WorkerGone,

    /// The worker thread panicked.
    #[error("render worker panicked")]
    WorkerPanicked,

    /// Invalid render configuration.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error (thread spawn, image export).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidCommand(err.to_string())
    }
}
