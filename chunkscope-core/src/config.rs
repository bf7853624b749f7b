//! Configuration for chunked access.

use crate::{Error, Result};
use std::time::Duration;

/// Default number of elements per chunk along the first dimension.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// What the cache does once every attempt for a key has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Clear the in-flight marker so a later caller may try again.
    #[default]
    Retry,
    /// Remember the failure and fail fast on every later request for the key.
    Blacklist,
}

/// Exponential backoff between fetch attempts for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per resolution (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the number of attempts.
    ///
    /// Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the initial and maximum backoff.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

/// Chunk geometry shared by the chunked clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Elements (rows) per chunk.
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkingConfig {
    /// Set the chunk size.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_chunk_size`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Fallible variant of [`Self::with_chunk_size`].
    ///
    /// # Errors
    /// Returns an error if `size` is 0.
    pub fn try_with_chunk_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::ConfigError(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        self.chunk_size = size;
        Ok(self)
    }

    /// Number of chunks needed to cover `len` elements.
    #[must_use]
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size.max(1))
    }

    /// Element range `[start, end)` of chunk `index`, clipped to `len`.
    #[must_use]
    pub fn chunk_bounds(&self, index: usize, len: usize) -> (usize, usize) {
        let size = self.chunk_size.max(1);
        let start = index.saturating_mul(size).min(len);
        let end = start.saturating_add(size).min(len);
        (start, end)
    }
}

/// Configuration shared by every specialized client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientConfig {
    /// Chunk geometry.
    pub chunking: ChunkingConfig,
    /// Backoff between attempts.
    pub retry: RetryPolicy,
    /// Behaviour after the last attempt fails.
    pub failure_policy: FailurePolicy,
}

impl ClientConfig {
    /// Set the chunk size (clamped to at least 1).
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunking = self.chunking.with_chunk_size(size);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
