//! Error types for chunkscope-core.

use thiserror::Error;

/// Result type alias for chunkscope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types shared by the cache, the timestamp search and the clients.
///
/// Errors are `Clone` because a single in-flight fetch fans its outcome out to
/// every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The transport failed (network error, non-success status, bad framing).
    #[error("transport error ({context}): {message}")]
    Transport { context: String, message: String },

    /// A dataset, group, directory or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A chunk could not be fetched.
    #[error("unable to fetch chunk {key}: {message}")]
    ChunkFetch { key: String, message: String },

    /// A chunk failed before and the cache refuses to fetch it again.
    #[error("chunk {key} failed previously: {message}")]
    ChunkBlacklisted { key: String, message: String },

    /// Remote data had an unexpected shape, type or value.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Client metadata failed to load.
    #[error("load failed: {0}")]
    LoadFailed(String),

    /// The operation was canceled and its result discarded.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Build a transport error from any displayable cause.
    pub fn transport(context: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            context: context.into(),
            message: cause.to_string(),
        }
    }

    /// Returns true when the error only signals cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns true when retrying the same request could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ChunkFetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_message_embeds_context() {
        let err = Error::transport("/units/spike_times", "status 503");
        assert_eq!(
            err.to_string(),
            "transport error (/units/spike_times): status 503"
        );
        assert!(err.is_retryable());
        assert!(!err.is_canceled());
    }

    #[test]
    fn canceled_is_not_retryable() {
        assert!(Error::Canceled.is_canceled());
        assert!(!Error::Canceled.is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }
}
