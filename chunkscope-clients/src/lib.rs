//! chunkscope-clients: specialized clients over chunked remote datasets.
//!
//! This crate provides one client per kind of recording data:
//! - **Spike trains** - ragged per-unit timestamps, time-chunked views and PSTHs
//! - **ROI traces** - samples × channels matrices on a regular or irregular time base
//! - **Multiscale matrices** - spike density and spectrograms at the right zoom level
//! - **Video** - MJPEG frame runs from the video service with prefetch
//!
#![warn(missing_docs)]

mod dataset_timestamps;
mod multiscale;
mod psth;
mod roi;
mod spike_trains;
mod time_chunks;
mod timebase;
mod video;

pub use dataset_timestamps::DatasetTimestamps;
pub use multiscale::{DensityMatrix, MultiscaleLayout, MultiscaleMatrixClient};
pub use psth::{align_to_trials, psth_histogram, Psth, TrialWindow};
pub use roi::{RoiClient, RoiData};
pub use spike_trains::{SpikeKind, SpikeQuery, SpikeTrainsClient, UnitId, UnitSpikeTrain};
pub use time_chunks::{TimeChunkedSpikeTrains, DEFAULT_CHUNK_DURATION_SEC};
pub use timebase::TimeBase;
pub use video::{split_mjpeg, VideoClient, VideoConfig, VideoInfo, VIDEO_SERVICE};

// Re-export the configuration every client takes
pub use chunkscope_core::{ClientConfig, FailurePolicy, LoadStatus, RetryPolicy};
