//! chunkscope-core: chunk cache, cancellation and timestamp search.
//!
//! This crate provides the foundations of the remote chunked-data access
//! layer: structured chunk keys, a request-coalescing chunk cache with retry
//! and blacklist policies, cooperative cancellation, observable load status,
//! and interpolation search over chunked timestamp arrays.
//!

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod key;
pub mod multiscale;
pub mod status;
pub mod timestamps;
pub mod util;

pub use cache::ChunkCache;
pub use cancel::{CancelRegistration, Canceler};
pub use config::{ChunkingConfig, ClientConfig, FailurePolicy, RetryPolicy, DEFAULT_CHUNK_SIZE};
pub use error::{Error, Result};
pub use key::{ChunkKey, ResourceId};
pub use multiscale::{downsampled_name, select_downsample_factor};
pub use status::{LoadStatus, StatusCell};
pub use timestamps::{
    estimate_sampling_frequency, RegularTimestamps, TimestampFinder, TimestampsModel,
};
