//! Fluorescence (ROI) traces: a samples × channels `data` matrix with a
//! regular or irregular time base.

use crate::timebase::TimeBase;
use chunkscope_core::util::usize_to_u64;
use chunkscope_core::{
    Canceler, ChunkCache, ChunkKey, ChunkingConfig, ClientConfig, Error, LoadStatus, ResourceId,
    Result, StatusCell,
};
use chunkscope_io::dataset::join_path;
use chunkscope_io::{ArrayData, DatasetReader, ReadOptions};
use futures::future;
use rayon::prelude::*;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Samples in `[t1, t2)` for a set of channels.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RoiData {
    /// Time of every returned sample.
    pub timestamps: Vec<f64>,
    /// Channel index of each trace.
    pub channels: Vec<usize>,
    /// One trace per channel, scaled by `conversion` and `offset`.
    pub traces: Vec<Vec<f64>>,
}

struct RoiMeta {
    data_path: String,
    resource: ResourceId,
    num_samples: usize,
    num_channels: usize,
    conversion: f64,
    offset: f64,
    time_base: TimeBase,
}

/// Client for one ROI response series group.
pub struct RoiClient {
    reader: Arc<dyn DatasetReader>,
    group_path: String,
    config: ClientConfig,
    status: StatusCell,
    meta: OnceCell<RoiMeta>,
    cache: ChunkCache<ChunkKey, ArrayData>,
    canceler: Canceler,
}

impl RoiClient {
    /// Create a client for the series group at `group_path`.
    pub fn new(
        reader: Arc<dyn DatasetReader>,
        group_path: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        Self {
            reader,
            group_path: group_path.into(),
            cache: ChunkCache::new(config.retry, config.failure_policy),
            config,
            status: StatusCell::new(),
            meta: OnceCell::new(),
            canceler: Canceler::new(),
        }
    }

    /// Current load status.
    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.status.get()
    }

    /// Wait until the series metadata is loaded.
    ///
    /// # Errors
    /// Returns [`Error::LoadFailed`] if loading failed.
    pub async fn wait_for_loaded(&self) -> Result<()> {
        self.status.wait_for_loaded().await
    }

    /// Load shape, scaling attributes and the time base.
    ///
    /// # Errors
    /// Returns an error if `data` or the time base is missing.
    pub async fn load(&self) -> Result<()> {
        self.meta().await.map(|_| ())
    }

    /// Cancel outstanding work and drop cached chunks.
    pub fn close(&self) {
        self.canceler.cancel();
        self.cache.clear();
    }

    async fn meta(&self) -> Result<&RoiMeta> {
        self.canceler.check()?;
        self.meta
            .get_or_try_init(|| async {
                self.status.begin_loading();
                let outcome = self.load_meta().await;
                self.status.finish(&outcome);
                outcome
            })
            .await
    }

    async fn load_meta(&self) -> Result<RoiMeta> {
        let data_path = join_path(&self.group_path, "data");
        let info = self.reader.dataset_info(&data_path).await?;
        let num_samples = info.len();
        let num_channels = info.shape.get(1).copied().unwrap_or(1);
        let conversion = info.attr_f64("conversion").unwrap_or(1.0);
        let offset = info.attr_f64("offset").unwrap_or(0.0);
        let time_base = TimeBase::load(
            &self.reader,
            &self.group_path,
            num_samples,
            &self.canceler,
            &self.config,
        )
        .await?;
        log::debug!(
            "{data_path}: {num_samples} samples x {num_channels} channels, {} Hz",
            time_base.sampling_frequency().unwrap_or(f64::NAN)
        );
        Ok(RoiMeta {
            resource: ResourceId::new(&data_path),
            data_path,
            num_samples,
            num_channels,
            conversion,
            offset,
            time_base,
        })
    }

    /// Number of samples.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn num_samples(&self) -> Result<usize> {
        Ok(self.meta().await?.num_samples)
    }

    /// Number of channels (1 for one-dimensional data).
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn num_channels(&self) -> Result<usize> {
        Ok(self.meta().await?.num_channels)
    }

    /// Sampling frequency, estimated for irregular series.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn sampling_frequency(&self) -> Result<Option<f64>> {
        Ok(self.meta().await?.time_base.sampling_frequency())
    }

    fn chunking(&self) -> ChunkingConfig {
        self.config.chunking
    }

    async fn data_chunk(&self, meta: &RoiMeta, index: usize) -> Result<Arc<ArrayData>> {
        let (start, end) = self.chunking().chunk_bounds(index, meta.num_samples);
        let reader = Arc::clone(&self.reader);
        let path = meta.data_path.clone();
        let canceler = self.canceler.clone();
        self.cache
            .get(
                ChunkKey::new(meta.resource.clone(), usize_to_u64(index)),
                move || {
                    let reader = Arc::clone(&reader);
                    let path = path.clone();
                    let options = ReadOptions::rows(start..end).with_canceler(canceler.clone());
                    async move { reader.dataset_data(&path, options).await }
                },
            )
            .await
    }

    /// Samples in `[t1, t2)` for `channels` (every channel when `None`).
    ///
    /// # Errors
    /// Returns [`Error::InvalidData`] for a channel out of range,
    /// [`Error::Canceled`] after [`Self::close`], or a fetch error.
    pub async fn get_data(&self, t1: f64, t2: f64, channels: Option<&[usize]>) -> Result<RoiData> {
        let meta = self.meta().await?;
        let channels: Vec<usize> = match channels {
            Some(c) => c.to_vec(),
            None => (0..meta.num_channels).collect(),
        };
        if let Some(&bad) = channels.iter().find(|&&c| c >= meta.num_channels) {
            return Err(Error::InvalidData(format!(
                "{}: channel {bad} out of range ({} channels)",
                meta.data_path, meta.num_channels
            )));
        }
        let (i1, i2) = meta.time_base.index_range(t1, t2).await?;
        // a timestamps dataset may outrun the data rows
        let i2 = i2.min(meta.num_samples);
        if i1 >= i2 {
            return Ok(RoiData {
                timestamps: Vec::new(),
                traces: vec![Vec::new(); channels.len()],
                channels,
            });
        }

        let size = self.chunking().chunk_size;
        let (first, last) = (i1 / size, (i2 - 1) / size);
        let (timestamps, chunks) = self
            .canceler
            .finish(future::try_join(
                meta.time_base.times(i1, i2),
                future::try_join_all((first..=last).map(|c| self.data_chunk(meta, c))),
            ))
            .await?;

        let width = meta.num_channels;
        if timestamps.len() != i2 - i1 {
            return Err(Error::InvalidData(format!(
                "{}: {} timestamps for samples {i1}..{i2}",
                meta.data_path,
                timestamps.len()
            )));
        }
        for (c, chunk) in (first..=last).zip(&chunks) {
            let (start, end) = self.chunking().chunk_bounds(c, meta.num_samples);
            if chunk.rows() != end - start
                || chunk.row_len() != width
                || chunk.values.len() != (end - start) * width
            {
                return Err(Error::InvalidData(format!(
                    "{}: chunk {c} has shape {:?}, expected [{}, {width}]",
                    meta.data_path,
                    chunk.shape,
                    end - start
                )));
            }
        }
        let (conversion, offset) = (meta.conversion, meta.offset);
        let traces = channels
            .par_iter()
            .map(|&ch| {
                let mut trace = Vec::with_capacity(i2 - i1);
                for (c, chunk) in (first..=last).zip(&chunks) {
                    let base = c * size;
                    let lo = i1.max(base) - base;
                    let hi = (i2 - base).min(chunk.rows());
                    trace.extend(
                        (lo..hi).map(|row| chunk.values[row * width + ch] * conversion + offset),
                    );
                }
                trace
            })
            .collect();
        Ok(RoiData {
            timestamps,
            channels,
            traces,
        })
    }
}

impl Drop for RoiClient {
    fn drop(&mut self) {
        self.canceler.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkscope_io::{DatasetInfo, Dtype, GroupInfo, MemoryDatasetReader};
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::{json, Map};

    fn reader(conversion: serde_json::Value) -> Arc<MemoryDatasetReader> {
        let mut data_attrs = Map::new();
        data_attrs.insert("conversion".into(), conversion);
        data_attrs.insert("offset".into(), json!(1.0));
        let mut rate = Map::new();
        rate.insert("rate".into(), json!(4.0));
        // 10 samples x 3 channels, value = sample * 10 + channel
        let values = (0..10)
            .flat_map(|s| (0..3).map(move |c| f64::from(s * 10 + c)))
            .collect();
        Arc::new(
            MemoryDatasetReader::new()
                .with_dataset("/roi/data", vec![10, 3], Dtype::F32, values, data_attrs)
                .with_dataset("/roi/starting_time", vec![1], Dtype::F64, vec![0.0], rate),
        )
    }

    #[tokio::test]
    async fn traces_are_deinterleaved_and_scaled() {
        let client = RoiClient::new(
            reader(json!(2.0)),
            "/roi",
            ClientConfig::default().with_chunk_size(4),
        );
        assert_eq!(client.num_channels().await.unwrap(), 3);
        // samples at 0.25 s spacing: [0.5, 1.5) -> samples 2..6
        let data = client.get_data(0.5, 1.5, Some(&[2, 0])).await.unwrap();
        assert_eq!(data.timestamps, vec![0.5, 0.75, 1.0, 1.25]);
        assert_eq!(data.channels, vec![2, 0]);
        assert_eq!(data.traces[0], vec![45.0, 65.0, 85.0, 105.0]);
        assert_eq!(data.traces[1], vec![41.0, 61.0, 81.0, 101.0]);
        assert!(client.get_data(0.0, 1.0, Some(&[3])).await.is_err());
    }

    #[tokio::test]
    async fn nan_conversion_falls_back_to_identity() {
        let client = RoiClient::new(reader(json!("NaN")), "/roi", ClientConfig::default());
        let data = client.get_data(0.0, 0.5, None).await.unwrap();
        assert_eq!(data.traces.len(), 3);
        assert_eq!(data.traces[1], vec![2.0, 12.0]);
        let empty = client.get_data(5.0, 6.0, None).await.unwrap();
        assert!(empty.timestamps.is_empty());
        assert_eq!(empty.traces.len(), 3);
    }

    #[tokio::test]
    async fn longer_timestamps_are_clipped_to_data_rows() {
        let timestamps = (0..20).map(|i| f64::from(i) * 0.5).collect();
        let data = (0..10).map(f64::from).collect();
        let reader = Arc::new(
            MemoryDatasetReader::new()
                .with_dataset("/roi/data", vec![10], Dtype::F32, data, Map::new())
                .with_vec("/roi/timestamps", timestamps),
        );
        let client = RoiClient::new(reader, "/roi", ClientConfig::default().with_chunk_size(4));
        let all = client.get_data(0.0, 100.0, None).await.unwrap();
        assert_eq!(all.timestamps.len(), 10);
        assert_eq!(all.traces[0].len(), 10);
        assert_eq!(all.timestamps.last().copied(), Some(4.5));
        let beyond = client.get_data(6.0, 8.0, None).await.unwrap();
        assert!(beyond.timestamps.is_empty());
        assert!(beyond.traces[0].is_empty());
    }

    /// Serves `data` chunks with one column fewer than advertised.
    struct NarrowChunks(Arc<MemoryDatasetReader>);

    impl DatasetReader for NarrowChunks {
        fn dataset_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<DatasetInfo>> {
            self.0.dataset_info(path)
        }

        fn dataset_data<'a>(
            &'a self,
            path: &'a str,
            options: ReadOptions,
        ) -> BoxFuture<'a, Result<ArrayData>> {
            async move {
                let full = self.0.dataset_data(path, options).await?;
                if !path.ends_with("data") {
                    return Ok(full);
                }
                let width = full.row_len();
                let values = full
                    .values
                    .chunks(width)
                    .flat_map(|row| row[..width - 1].iter().copied())
                    .collect();
                Ok(ArrayData::new(vec![full.rows(), width - 1], values))
            }
            .boxed()
        }

        fn group_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<GroupInfo>> {
            self.0.group_info(path)
        }
    }

    #[tokio::test]
    async fn malformed_chunks_are_rejected() {
        let client = RoiClient::new(
            Arc::new(NarrowChunks(reader(json!(1.0)))),
            "/roi",
            ClientConfig::default().with_chunk_size(4),
        );
        let err = client.get_data(0.0, 1.0, Some(&[2])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)), "{err}");
    }
}
