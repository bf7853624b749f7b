//! Chunked timestamp arrays and interpolation search.
//!
//! A [`TimestampsModel`] exposes a long, non-decreasing array of times that is
//! only available in chunks. [`TimestampFinder`] locates the index nearest a
//! time by interpolation search, fetching just the chunks it probes.

use crate::cache::ChunkCache;
use crate::config::ClientConfig;
use crate::key::{ChunkKey, ResourceId};
use crate::util::{f64_to_usize_bounded, f64_to_usize_clamped, usize_to_f64, usize_to_u64};
use crate::{ChunkingConfig, Error, Result};
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::Arc;

/// Source of a chunked, non-decreasing timestamp array.
pub trait TimestampsModel: Send + Sync {
    /// Identifier used to key cached chunks.
    fn resource(&self) -> &ResourceId;

    /// Total number of timestamps.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch timestamps `[start, end)`. `Ok(None)` means the data is missing.
    fn get_chunk(&self, start: usize, end: usize) -> BoxFuture<'_, Result<Option<Vec<f64>>>>;
}

impl<M: TimestampsModel + ?Sized> TimestampsModel for Arc<M> {
    fn resource(&self) -> &ResourceId {
        (**self).resource()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get_chunk(&self, start: usize, end: usize) -> BoxFuture<'_, Result<Option<Vec<f64>>>> {
        (**self).get_chunk(start, end)
    }
}

/// Index and range lookups over a [`TimestampsModel`].
pub struct TimestampFinder<M> {
    model: Arc<M>,
    chunking: ChunkingConfig,
    cache: ChunkCache<ChunkKey, Vec<f64>>,
}

impl<M> Clone for TimestampFinder<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            chunking: self.chunking,
            cache: self.cache.clone(),
        }
    }
}

impl<M> TimestampFinder<M>
where
    M: TimestampsModel + 'static,
{
    /// Creates a finder with its own chunk cache.
    pub fn new(model: Arc<M>, config: &ClientConfig) -> Self {
        Self {
            model,
            chunking: config.chunking,
            cache: ChunkCache::new(config.retry, config.failure_policy),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.model.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunking.chunk_size
    }

    /// Drop cached chunks.
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn chunk(&self, index: usize) -> BoxFuture<'static, Result<Arc<Vec<f64>>>> {
        let len = self.model.len();
        let (start, end) = self.chunking.chunk_bounds(index, len);
        let key = ChunkKey::new(self.model.resource().clone(), usize_to_u64(index));
        let model = Arc::clone(&self.model);
        self.cache.get(key, move || {
            let model = Arc::clone(&model);
            async move {
                log::debug!("fetching {} [{start}, {end})", model.resource());
                match model.get_chunk(start, end).await? {
                    Some(values) if values.len() == end - start => Ok(values),
                    Some(values) => Err(Error::InvalidData(format!(
                        "{}: expected {} timestamps in [{start}, {end}), got {}",
                        model.resource(),
                        end - start,
                        values.len()
                    ))),
                    None => Err(Error::NotFound(format!(
                        "{} [{start}, {end})",
                        model.resource()
                    ))),
                }
            }
        })
    }

    /// Timestamp at index `i`.
    ///
    /// # Errors
    /// Returns an error if `i` is out of range or its chunk cannot be fetched.
    pub async fn value_at(&self, i: usize) -> Result<f64> {
        let len = self.model.len();
        if i >= len {
            return Err(Error::InvalidData(format!(
                "index {i} out of range for {} (length {len})",
                self.model.resource()
            )));
        }
        let size = self.chunking.chunk_size;
        let chunk = self.chunk(i / size).await?;
        chunk
            .get(i % size)
            .copied()
            .ok_or_else(|| Error::InvalidData(format!("index {i} missing from its chunk")))
    }

    /// Timestamps `[i1, i2)`, clipped to the array length.
    ///
    /// Chunks are fetched concurrently and reassembled by index.
    ///
    /// # Errors
    /// Returns an error naming the chunk key if any chunk cannot be fetched.
    pub async fn data_for_indices(&self, i1: usize, i2: usize) -> Result<Vec<f64>> {
        let i2 = i2.min(self.model.len());
        if i1 >= i2 {
            return Ok(Vec::new());
        }
        let size = self.chunking.chunk_size;
        let first = i1 / size;
        let last = (i2 - 1) / size;
        let chunks = future::try_join_all((first..=last).map(|c| self.chunk(c))).await?;

        let mut out = Vec::with_capacity(i2 - i1);
        for (c, chunk) in (first..=last).zip(&chunks) {
            let base = c * size;
            let lo = i1.max(base) - base;
            let hi = (i2 - base).min(chunk.len());
            if lo < hi {
                out.extend_from_slice(&chunk[lo..hi]);
            }
        }
        if out.len() != i2 - i1 {
            return Err(Error::InvalidData(format!(
                "{}: assembled {} of {} timestamps",
                self.model.resource(),
                out.len(),
                i2 - i1
            )));
        }
        Ok(out)
    }

    /// Index of the timestamp nearest `t`.
    ///
    /// Ties between two neighbours resolve to the later index. A NaN final
    /// timestamp is ignored.
    ///
    /// # Errors
    /// Returns [`Error::InvalidData`] for an empty array, or a fetch error.
    #[allow(clippy::float_cmp)]
    pub async fn data_index_for_time(&self, t: f64) -> Result<usize> {
        let len = self.model.len();
        match len {
            0 => {
                return Err(Error::InvalidData(format!(
                    "{} has no timestamps",
                    self.model.resource()
                )))
            }
            1 => return Ok(0),
            _ => {}
        }

        let mut i_lower = 0;
        let mut t_lower = self.value_at(0).await?;
        let mut i_upper = len - 1;
        let mut t_upper = self.value_at(i_upper).await?;
        if t_upper.is_nan() {
            i_upper -= 1;
            t_upper = self.value_at(i_upper).await?;
        }

        while i_upper - i_lower > 1 {
            if t < t_lower {
                return Ok(i_lower);
            }
            if t > t_upper {
                return Ok(i_upper);
            }
            let span = i_upper - i_lower;
            let mid = i_lower + span / 2;
            let mut estimate = if t_upper > t_lower {
                let frac = (t - t_lower) / (t_upper - t_lower);
                f64_to_usize_bounded((usize_to_f64(span) * frac).floor(), span + 1)
                    .map_or(mid, |offset| i_lower + offset)
            } else {
                mid
            };
            if estimate <= i_lower || estimate >= i_upper {
                estimate = mid;
            }

            let t_estimate = self.value_at(estimate).await?;
            if t_estimate == t {
                return Ok(estimate);
            }
            if t_estimate < t {
                i_lower = estimate;
                t_lower = t_estimate;
            } else {
                i_upper = estimate;
                t_upper = t_estimate;
            }
        }

        if (t - t_lower).abs() < (t_upper - t).abs() {
            Ok(i_lower)
        } else {
            Ok(i_upper)
        }
    }

    /// Index range `[i1, i2)` covering times in `[t1, t2)`, widened by one on
    /// each side so callers can filter exactly.
    ///
    /// # Errors
    /// Propagates search errors.
    pub async fn index_range_for_times(&self, t1: f64, t2: f64) -> Result<(usize, usize)> {
        if self.model.is_empty() {
            return Ok((0, 0));
        }
        let i1 = self.data_index_for_time(t1).await?.saturating_sub(1);
        let i2 = (self.data_index_for_time(t2).await? + 2).min(self.model.len());
        Ok((i1, i2))
    }
}

/// Timestamps reconstructed from a start time and a sampling rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularTimestamps {
    resource: ResourceId,
    start_time: f64,
    rate: f64,
    len: usize,
}

impl RegularTimestamps {
    /// A non-positive or non-finite rate is treated as 1 Hz.
    pub fn new(resource: ResourceId, start_time: f64, rate: f64, len: usize) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        let start_time = if start_time.is_finite() { start_time } else { 0.0 };
        Self {
            resource,
            start_time,
            rate,
            len,
        }
    }

    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + usize_to_f64(self.len) / self.rate
    }

    #[must_use]
    pub fn time_at(&self, i: usize) -> f64 {
        self.start_time + usize_to_f64(i) / self.rate
    }

    /// Nearest sample index for `t`, clamped into the array.
    #[must_use]
    pub fn index_for_time(&self, t: f64) -> usize {
        if self.len == 0 || t <= self.start_time {
            return 0;
        }
        let last = self.len - 1;
        f64_to_usize_clamped(((t - self.start_time) * self.rate).round(), last)
    }

    /// Sample range `[i1, i2)` whose times fall in `[t1, t2)`.
    #[must_use]
    pub fn index_range(&self, t1: f64, t2: f64) -> (usize, usize) {
        let to_index =
            |t: f64| f64_to_usize_clamped(((t - self.start_time) * self.rate).ceil(), self.len);
        let i1 = to_index(t1);
        let i2 = to_index(t2).max(i1);
        (i1, i2)
    }
}

impl TimestampsModel for RegularTimestamps {
    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn len(&self) -> usize {
        self.len
    }

    fn get_chunk(&self, start: usize, end: usize) -> BoxFuture<'_, Result<Option<Vec<f64>>>> {
        let end = end.min(self.len);
        let values = (start..end).map(|i| self.time_at(i)).collect();
        future::ready(Ok(Some(values))).boxed()
    }
}

/// Estimate a sampling frequency as the reciprocal of the median positive
/// interval between consecutive timestamps.
#[must_use]
pub fn estimate_sampling_frequency(timestamps: &[f64]) -> Option<f64> {
    let mut deltas: Vec<f64> = timestamps
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| d.is_finite())
        .collect();
    if deltas.is_empty() {
        return None;
    }
    deltas.sort_by(f64::total_cmp);
    let median = deltas[deltas.len() / 2];
    (median > 0.0).then(|| 1.0 / median)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn regular_index_lookup() {
        let ts = RegularTimestamps::new("/roi".into(), 2.0, 10.0, 100);
        assert_eq!(ts.index_for_time(0.0), 0);
        assert_eq!(ts.index_for_time(2.26), 3);
        assert_eq!(ts.index_for_time(50.0), 99);
        assert_relative_eq!(ts.end_time(), 12.0);
        assert_eq!(ts.index_range(2.25, 2.5), (3, 5));
    }

    #[test]
    fn zero_rate_is_one_hz() {
        let ts = RegularTimestamps::new("/roi".into(), 0.0, 0.0, 10);
        assert_relative_eq!(ts.rate(), 1.0);
        assert_relative_eq!(ts.time_at(4), 4.0);
    }

    #[test]
    fn sampling_frequency_uses_median() {
        let ts = [0.0, 0.1, 0.2, 0.3, 5.0, 5.1];
        assert_relative_eq!(estimate_sampling_frequency(&ts).unwrap(), 10.0, epsilon = 1e-9);
        assert!(estimate_sampling_frequency(&[1.0]).is_none());
    }

    #[tokio::test]
    async fn finder_over_regular_model() {
        let model = Arc::new(RegularTimestamps::new("/t".into(), 0.0, 4.0, 1000));
        let finder = TimestampFinder::new(model, &ClientConfig::default().with_chunk_size(64));
        assert_eq!(finder.data_index_for_time(10.1).await.unwrap(), 40);
        // 10.125 is exactly between 10.0 (index 40) and 10.25 (index 41)
        assert_eq!(finder.data_index_for_time(10.125).await.unwrap(), 41);
        assert_eq!(finder.data_index_for_time(-3.0).await.unwrap(), 0);
        assert_eq!(finder.data_index_for_time(1e9).await.unwrap(), 999);
        let slice = finder.data_for_indices(60, 70).await.unwrap();
        assert_eq!(slice.len(), 10);
        assert_relative_eq!(slice[0], 15.0);
    }
}
