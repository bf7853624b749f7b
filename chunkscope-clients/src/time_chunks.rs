//! Fixed-duration time chunks over a [`SpikeTrainsClient`].
//!
//! Views that scroll through a recording ask for overlapping windows over and
//! over. Caching whole time chunks per unit turns those into lookups.

use crate::spike_trains::{SpikeQuery, SpikeTrainsClient, UnitId, UnitSpikeTrain};
use chunkscope_core::util::{f64_to_usize_clamped, usize_to_f64, usize_to_u64};
use chunkscope_core::{ChunkCache, ChunkKey, ClientConfig, ResourceId, Result};
use futures::future;
use std::sync::Arc;

/// Default time chunk length in seconds.
pub const DEFAULT_CHUNK_DURATION_SEC: f64 = 30.0;

/// Spike trains fetched and cached in fixed-duration chunks.
pub struct TimeChunkedSpikeTrains {
    client: Arc<SpikeTrainsClient>,
    chunk_duration: f64,
    cache: ChunkCache<ChunkKey, Vec<f64>>,
    resource: ResourceId,
}

impl TimeChunkedSpikeTrains {
    /// Wrap `client` with chunks of [`DEFAULT_CHUNK_DURATION_SEC`].
    pub fn new(client: Arc<SpikeTrainsClient>, config: &ClientConfig) -> Self {
        Self {
            client,
            chunk_duration: DEFAULT_CHUNK_DURATION_SEC,
            cache: ChunkCache::new(config.retry, config.failure_policy),
            resource: ResourceId::new("time-chunks"),
        }
    }

    /// Set the chunk duration; non-positive or non-finite values keep the
    /// current duration.
    #[must_use]
    pub fn with_chunk_duration(mut self, seconds: f64) -> Self {
        if seconds.is_finite() && seconds > 0.0 {
            self.chunk_duration = seconds;
        }
        self
    }

    /// Chunk duration in seconds.
    #[must_use]
    pub fn chunk_duration(&self) -> f64 {
        self.chunk_duration
    }

    /// The wrapped client.
    #[must_use]
    pub fn client(&self) -> &Arc<SpikeTrainsClient> {
        &self.client
    }

    fn chunk_key(&self, unit_id: UnitId, chunk: usize) -> ChunkKey {
        ChunkKey::new(self.resource.child(unit_id), usize_to_u64(chunk))
    }

    async fn unit_chunk(&self, anchor: f64, unit_id: UnitId, chunk: usize) -> Result<Arc<Vec<f64>>> {
        let client = Arc::clone(&self.client);
        let duration = self.chunk_duration;
        let t1 = anchor + usize_to_f64(chunk) * duration;
        let t2 = anchor + usize_to_f64(chunk + 1) * duration;
        self.cache
            .get(self.chunk_key(unit_id, chunk), move || {
                let client = Arc::clone(&client);
                async move {
                    let mut trains = client.get_data(t1, t2, &SpikeQuery::units([unit_id])).await?;
                    Ok(trains.pop().map(|t| t.times).unwrap_or_default())
                }
            })
            .await
    }

    /// Chunks are anchored at the unit's own first spike, so chunk 0 holds it
    /// and the last chunk holds its last spike.
    async fn unit_window(
        &self,
        unit_id: UnitId,
        t1: f64,
        t2: f64,
        align_to: Option<f64>,
    ) -> Result<UnitSpikeTrain> {
        let empty = UnitSpikeTrain {
            unit_id,
            times: Vec::new(),
        };
        let Some((anchor, last_spike)) = self.client.unit_time_range(unit_id).await? else {
            return Ok(empty);
        };
        if !anchor.is_finite() || t2 <= anchor || (last_spike.is_finite() && t1 > last_spike) {
            return Ok(empty);
        }
        let last_chunk = if last_spike.is_finite() {
            f64_to_usize_clamped(((last_spike - anchor) / self.chunk_duration).floor(), usize::MAX)
        } else {
            usize::MAX
        };
        let first = f64_to_usize_clamped(((t1 - anchor) / self.chunk_duration).floor(), last_chunk);
        let last = f64_to_usize_clamped(((t2 - anchor) / self.chunk_duration).floor(), last_chunk)
            .max(first);
        let chunks = future::try_join_all(
            (first..=last).map(|c| self.unit_chunk(anchor, unit_id, c)),
        )
        .await?;
        let shift = align_to.unwrap_or(0.0);
        let times = chunks
            .iter()
            .flat_map(|c| c.iter().copied())
            .filter(|&t| t >= t1 && t < t2)
            .map(|t| t - shift)
            .collect();
        Ok(UnitSpikeTrain { unit_id, times })
    }

    /// Same contract as [`SpikeTrainsClient::get_data`], served from cached
    /// time chunks.
    ///
    /// # Errors
    /// Returns an error for unknown units or failed fetches.
    pub async fn get_data(&self, t1: f64, t2: f64, query: &SpikeQuery) -> Result<Vec<UnitSpikeTrain>> {
        let unit_ids = match &query.unit_ids {
            Some(ids) => ids.clone(),
            None => self.client.unit_ids().await?,
        };
        if t2 <= t1 {
            return Ok(unit_ids
                .into_iter()
                .map(|unit_id| UnitSpikeTrain {
                    unit_id,
                    times: Vec::new(),
                })
                .collect());
        }
        future::try_join_all(
            unit_ids
                .into_iter()
                .map(|id| self.unit_window(id, t1, t2, query.align_to)),
        )
        .await
    }

    /// Drop cached time chunks.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkscope_io::MemoryDatasetReader;

    #[tokio::test]
    async fn overlapping_windows_reuse_chunks() {
        let times: Vec<f64> = (0..600).map(|i| f64::from(i) * 0.25).collect();
        let reader = Arc::new(
            MemoryDatasetReader::new()
                .with_vec("/units/spike_times", times)
                .with_vec("/units/spike_times_index", vec![600.0])
                .with_vec("/units/id", vec![1.0]),
        );
        let client = Arc::new(SpikeTrainsClient::new(
            reader,
            "/units",
            ClientConfig::default(),
        ));
        let chunked = TimeChunkedSpikeTrains::new(client, &ClientConfig::default())
            .with_chunk_duration(10.0);

        let a = chunked.get_data(12.0, 25.0, &SpikeQuery::all()).await.unwrap();
        assert_eq!(a[0].times.len(), 52);
        assert_eq!(chunked.cache.len(), 2);
        let b = chunked.get_data(15.0, 28.0, &SpikeQuery::all()).await.unwrap();
        assert_eq!(b[0].times.first().copied(), Some(15.0));
        assert_eq!(chunked.cache.len(), 2);
        let c = chunked
            .get_data(29.0, 31.0, &SpikeQuery::units([1]).aligned_to(30.0))
            .await
            .unwrap();
        assert_eq!(c[0].times.first().copied(), Some(-1.0));
        assert_eq!(chunked.cache.len(), 3);
    }

    #[tokio::test]
    async fn units_starting_before_the_first_flat_value_are_served() {
        let reader = Arc::new(
            MemoryDatasetReader::new()
                .with_vec("/units/spike_times", vec![5.0, 6.0, 7.0, 1.0, 2.0, 3.0])
                .with_vec("/units/spike_times_index", vec![3.0, 6.0])
                .with_vec("/units/id", vec![10.0, 11.0]),
        );
        let client = Arc::new(SpikeTrainsClient::new(
            reader,
            "/units",
            ClientConfig::default(),
        ));
        let chunked = TimeChunkedSpikeTrains::new(Arc::clone(&client), &ClientConfig::default());

        let query = SpikeQuery::units([11]);
        let direct = client.get_data(0.0, 4.0, &query).await.unwrap();
        let cached = chunked.get_data(0.0, 4.0, &query).await.unwrap();
        assert_eq!(direct[0].times, vec![1.0, 2.0, 3.0]);
        assert_eq!(cached, direct);

        let both = chunked.get_data(2.0, 6.0, &SpikeQuery::all()).await.unwrap();
        assert_eq!(both[0].times, vec![5.0]);
        assert_eq!(both[1].times, vec![2.0, 3.0]);
        // windows entirely outside a unit's spikes fetch nothing for it
        let before = chunked.cache.len();
        let empty = chunked.get_data(100.0, 200.0, &query).await.unwrap();
        assert!(empty[0].times.is_empty());
        assert_eq!(chunked.cache.len(), before);
    }
}
