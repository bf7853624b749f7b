//! Sample time bases for time series groups.
//!
//! A series either stores one timestamp per sample (`timestamps`) or a
//! `starting_time` scalar whose `rate` attribute gives the sampling rate.

use crate::dataset_timestamps::DatasetTimestamps;
use chunkscope_core::{
    estimate_sampling_frequency, Canceler, ClientConfig, Error, RegularTimestamps, ResourceId,
    Result, TimestampFinder, TimestampsModel,
};
use chunkscope_io::dataset::join_path;
use chunkscope_io::{DatasetReader, ReadOptions};
use std::sync::Arc;

/// Timestamps read to estimate an irregular series' sampling frequency.
const FREQUENCY_ESTIMATE_SAMPLES: usize = 10_000;

/// How sample indices map to times.
pub enum TimeBase {
    /// `starting_time` plus a constant rate.
    Regular(RegularTimestamps),
    /// One stored timestamp per sample.
    Irregular {
        /// Search over the `timestamps` dataset.
        finder: TimestampFinder<DatasetTimestamps>,
        /// Reciprocal of the median interval of the leading timestamps.
        sampling_frequency: Option<f64>,
    },
}

impl TimeBase {
    /// Read the time base of the series group at `group_path` with
    /// `num_samples` samples.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the group has neither `timestamps` nor
    /// `starting_time`, or a read error.
    pub async fn load(
        reader: &Arc<dyn DatasetReader>,
        group_path: &str,
        num_samples: usize,
        canceler: &Canceler,
        config: &ClientConfig,
    ) -> Result<Self> {
        let group = reader.group_info(group_path).await?;
        if group.has_dataset("timestamps") {
            let path = join_path(group_path, "timestamps");
            let len = reader.dataset_info(&path).await?.len();
            let head = reader
                .dataset_data(
                    &path,
                    ReadOptions::rows(0..FREQUENCY_ESTIMATE_SAMPLES.min(len))
                        .with_canceler(canceler.clone()),
                )
                .await?;
            let sampling_frequency = estimate_sampling_frequency(&head.values);
            let model = DatasetTimestamps::new(Arc::clone(reader), path, len, canceler.clone());
            return Ok(Self::Irregular {
                finder: TimestampFinder::new(Arc::new(model), config),
                sampling_frequency,
            });
        }
        if group.has_dataset("starting_time") {
            let path = join_path(group_path, "starting_time");
            let info = reader.dataset_info(&path).await?;
            let start = reader
                .dataset_data(&path, ReadOptions::default())
                .await?
                .values
                .first()
                .copied()
                .unwrap_or(0.0);
            let rate = info.attr_f64("rate").unwrap_or(1.0);
            let resource = ResourceId::new(group_path).child("starting_time");
            return Ok(Self::Regular(RegularTimestamps::new(
                resource,
                start,
                rate,
                num_samples,
            )));
        }
        Err(Error::NotFound(format!(
            "{group_path}: no timestamps or starting_time"
        )))
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Regular(ts) => ts.len(),
            Self::Irregular { finder, .. } => finder.len(),
        }
    }

    /// True when the series has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sampling frequency in Hz, estimated for irregular series.
    #[must_use]
    pub fn sampling_frequency(&self) -> Option<f64> {
        match self {
            Self::Regular(ts) => Some(ts.rate()),
            Self::Irregular {
                sampling_frequency, ..
            } => *sampling_frequency,
        }
    }

    /// Sample range `[i1, i2)` whose times fall in `[t1, t2)`.
    ///
    /// # Errors
    /// Returns a fetch error for irregular series.
    pub async fn index_range(&self, t1: f64, t2: f64) -> Result<(usize, usize)> {
        match self {
            Self::Regular(ts) => Ok(ts.index_range(t1, t2)),
            Self::Irregular { finder, .. } => {
                if finder.is_empty() || t2 <= t1 {
                    return Ok((0, 0));
                }
                let i1 = first_at_or_after(finder, t1).await?;
                let i2 = first_at_or_after(finder, t2).await?.max(i1);
                Ok((i1, i2))
            }
        }
    }

    /// Times of samples `[i1, i2)`.
    ///
    /// # Errors
    /// Returns a fetch error for irregular series.
    pub async fn times(&self, i1: usize, i2: usize) -> Result<Vec<f64>> {
        match self {
            Self::Regular(ts) => Ok((i1..i2.min(self.len())).map(|i| ts.time_at(i)).collect()),
            Self::Irregular { finder, .. } => finder.data_for_indices(i1, i2).await,
        }
    }
}

/// First index whose timestamp is at or after `t`, from the nearest index.
async fn first_at_or_after(finder: &TimestampFinder<DatasetTimestamps>, t: f64) -> Result<usize> {
    let i = finder.data_index_for_time(t).await?;
    let value = finder.value_at(i).await?;
    if value < t || value.is_nan() {
        Ok((i + 1).min(finder.len()))
    } else {
        Ok(i)
    }
}
