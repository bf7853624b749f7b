//! Multiscale matrices: a full-resolution `time × column` dataset plus
//! coarser siblings aggregated by integer factors.
//!
//! Spike density groups store `spike_counts`, `spike_counts_ds_3`,
//! `spike_counts_ds_9`, ... with `start_time_sec` and `bin_size_sec`
//! attributes. Spectrogram groups store `spectrogram`, `spectrogram_ds3`, ...
//! and describe the time axis with a sampling frequency instead.

use chunkscope_core::util::{f64_to_usize_clamped, usize_to_f64, usize_to_u64};
use chunkscope_core::{
    downsampled_name, select_downsample_factor, Canceler, ChunkCache, ChunkKey, ClientConfig,
    Error, LoadStatus, ResourceId, Result, StatusCell,
};
use chunkscope_io::dataset::join_path;
use chunkscope_io::{ArrayData, DatasetInfo, DatasetReader, GroupInfo, ReadOptions};
use futures::future;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Naming of a multiscale family of datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiscaleLayout {
    /// Full-resolution dataset name.
    pub base: String,
    /// Text between the base name and the factor in sibling names.
    pub separator: String,
}

impl MultiscaleLayout {
    /// Layout with a custom base name and separator.
    pub fn new(base: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            separator: separator.into(),
        }
    }

    /// `spike_counts` / `spike_counts_ds_<f>`.
    #[must_use]
    pub fn spike_density() -> Self {
        Self::new("spike_counts", "_ds_")
    }

    /// `spectrogram` / `spectrogram_ds<f>`.
    #[must_use]
    pub fn spectrogram() -> Self {
        Self::new("spectrogram", "_ds")
    }

    /// Factor encoded in a sibling name, if `name` belongs to this family.
    #[must_use]
    pub fn factor_of(&self, name: &str) -> Option<u32> {
        if name == self.base {
            return Some(1);
        }
        let digits = name.strip_prefix(&self.base)?.strip_prefix(&self.separator)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().filter(|&f| f > 1)
    }

    /// Dataset name for `factor`.
    #[must_use]
    pub fn dataset_name(&self, factor: u32) -> String {
        downsampled_name(&self.base, &self.separator, factor)
    }
}

/// A window of a multiscale matrix at one resolution.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DensityMatrix {
    /// Time of the first row's left edge.
    pub start_time: f64,
    /// Row duration at this resolution.
    pub bin_size: f64,
    /// Downsample factor the rows were read at.
    pub factor: u32,
    /// Number of time rows.
    pub rows: usize,
    /// Number of columns (units or frequencies).
    pub cols: usize,
    /// Row-major values.
    pub values: Vec<f64>,
}

impl DensityMatrix {
    /// Value at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// Column `col` as a time series.
    #[must_use]
    pub fn column(&self, col: usize) -> Vec<f64> {
        if col >= self.cols {
            return Vec::new();
        }
        self.values.iter().skip(col).step_by(self.cols).copied().collect()
    }

    /// Largest value, or 0 for an empty matrix.
    #[must_use]
    pub fn max_value(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }
}

struct Level {
    path: String,
    len: usize,
}

struct MultiscaleMeta {
    resource: ResourceId,
    levels: BTreeMap<u32, Level>,
    cols: usize,
    start_time: f64,
    bin_size: f64,
}

impl MultiscaleMeta {
    fn factors(&self) -> Vec<u32> {
        self.levels.keys().copied().collect()
    }
}

/// Time axis attributes, searched on the base dataset then on the group.
fn time_axis(group: &GroupInfo, base: &DatasetInfo) -> Option<(f64, f64)> {
    let attr = |name: &str| base.attr_f64(name).or_else(|| group.attr_f64(name));
    let start = attr("start_time_sec").unwrap_or(0.0);
    let bin_size = attr("bin_size_sec")
        .filter(|b| *b > 0.0)
        .or_else(|| {
            attr("sampling_frequency_hz")
                .or_else(|| attr("spectrogram_sr_hz"))
                .filter(|f| *f > 0.0)
                .map(|f| 1.0 / f)
        })?;
    Some((start, bin_size))
}

/// Client for one multiscale group.
pub struct MultiscaleMatrixClient {
    reader: Arc<dyn DatasetReader>,
    group_path: String,
    layout: MultiscaleLayout,
    config: ClientConfig,
    status: StatusCell,
    meta: OnceCell<MultiscaleMeta>,
    cache: ChunkCache<ChunkKey, ArrayData>,
    canceler: Canceler,
}

impl MultiscaleMatrixClient {
    /// Create a client for the group at `group_path`.
    pub fn new(
        reader: Arc<dyn DatasetReader>,
        group_path: impl Into<String>,
        layout: MultiscaleLayout,
        config: ClientConfig,
    ) -> Self {
        Self {
            reader,
            group_path: group_path.into(),
            layout,
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

    /// Wait until the group metadata is loaded.
    ///
    /// # Errors
    /// Returns [`Error::LoadFailed`] if loading failed.
    pub async fn wait_for_loaded(&self) -> Result<()> {
        self.status.wait_for_loaded().await
    }

    /// Discover the available factors and the time axis.
    ///
    /// # Errors
    /// Returns an error if the base dataset or its time axis is missing.
    pub async fn load(&self) -> Result<()> {
        self.meta().await.map(|_| ())
    }

    /// Cancel outstanding work and drop cached chunks.
    pub fn close(&self) {
        self.canceler.cancel();
        self.cache.clear();
    }

    async fn meta(&self) -> Result<&MultiscaleMeta> {
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

    async fn load_meta(&self) -> Result<MultiscaleMeta> {
        let group = self.reader.group_info(&self.group_path).await?;
        if !group.has_dataset(&self.layout.base) {
            return Err(Error::NotFound(join_path(&self.group_path, &self.layout.base)));
        }
        let base_path = join_path(&self.group_path, &self.layout.base);
        let base = self.reader.dataset_info(&base_path).await?;
        let (start_time, bin_size) = time_axis(&group, &base).ok_or_else(|| {
            Error::InvalidData(format!("{base_path}: no bin size or sampling frequency"))
        })?;
        let cols = base.shape.get(1).copied().unwrap_or(1);

        let mut levels = BTreeMap::new();
        levels.insert(
            1,
            Level {
                path: base_path,
                len: base.len(),
            },
        );
        for name in &group.datasets {
            let Some(factor) = self.layout.factor_of(name).filter(|&f| f > 1) else {
                continue;
            };
            let path = join_path(&self.group_path, name);
            let len = self.reader.dataset_info(&path).await?.len();
            levels.insert(factor, Level { path, len });
        }
        log::debug!(
            "{}: factors {:?}, {cols} columns, bin {bin_size} s",
            self.group_path,
            levels.keys().collect::<Vec<_>>()
        );
        Ok(MultiscaleMeta {
            resource: ResourceId::new(&self.group_path),
            levels,
            cols,
            start_time,
            bin_size,
        })
    }

    /// Available downsample factors, ascending (always includes 1).
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn factors(&self) -> Result<Vec<u32>> {
        Ok(self.meta().await?.factors())
    }

    /// Start time and full-resolution bin size.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn time_axis(&self) -> Result<(f64, f64)> {
        let meta = self.meta().await?;
        Ok((meta.start_time, meta.bin_size))
    }

    /// Time range covered by the full-resolution dataset.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn time_range(&self) -> Result<(f64, f64)> {
        let meta = self.meta().await?;
        let len = meta.levels.get(&1).map_or(0, |l| l.len);
        Ok((meta.start_time, meta.start_time + usize_to_f64(len) * meta.bin_size))
    }

    /// Number of columns.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be loaded.
    pub async fn num_columns(&self) -> Result<usize> {
        Ok(self.meta().await?.cols)
    }

    async fn level_chunk(
        &self,
        meta: &MultiscaleMeta,
        factor: u32,
        level: &Level,
        index: usize,
    ) -> Result<Arc<ArrayData>> {
        let (start, end) = self.config.chunking.chunk_bounds(index, level.len);
        let key = ChunkKey::with_factor(meta.resource.clone(), factor, usize_to_u64(index));
        let reader = Arc::clone(&self.reader);
        let path = level.path.clone();
        let canceler = self.canceler.clone();
        self.cache
            .get(key, move || {
                let reader = Arc::clone(&reader);
                let path = path.clone();
                let options = ReadOptions::rows(start..end).with_canceler(canceler.clone());
                async move { reader.dataset_data(&path, options).await }
            })
            .await
    }

    /// Rows covering `[t1, t2)` at the factor suited to `target_px` pixels.
    ///
    /// # Errors
    /// Returns [`Error::Canceled`] after [`Self::close`] or a fetch error.
    pub async fn get_data(&self, t1: f64, t2: f64, target_px: usize) -> Result<DensityMatrix> {
        let meta = self.meta().await?;
        let span = f64_to_usize_clamped(((t2 - t1) / meta.bin_size).ceil(), usize::MAX);
        let factor = select_downsample_factor(&meta.factors(), span, target_px);
        let (factor, level) = meta
            .levels
            .get_key_value(&factor)
            .or_else(|| meta.levels.get_key_value(&1))
            .ok_or_else(|| Error::NotFound(self.layout.base.clone()))?;
        let factor = *factor;
        let bin_size = meta.bin_size * f64::from(factor);

        let i1 = f64_to_usize_clamped(((t1 - meta.start_time) / bin_size).floor(), level.len);
        let i2 = f64_to_usize_clamped(((t2 - meta.start_time) / bin_size).ceil(), level.len).max(i1);
        let mut matrix = DensityMatrix {
            start_time: meta.start_time + usize_to_f64(i1) * bin_size,
            bin_size,
            factor,
            rows: i2 - i1,
            cols: meta.cols,
            values: Vec::with_capacity((i2 - i1) * meta.cols),
        };
        if i1 == i2 {
            return Ok(matrix);
        }

        let size = self.config.chunking.chunk_size;
        let (first, last) = (i1 / size, (i2 - 1) / size);
        let chunks = self
            .canceler
            .finish(future::try_join_all(
                (first..=last).map(|c| self.level_chunk(meta, factor, level, c)),
            ))
            .await?;
        for (c, chunk) in (first..=last).zip(&chunks) {
            let base = c * size;
            let lo = i1.max(base) - base;
            let hi = (i2 - base).min(chunk.rows());
            if lo < hi {
                matrix
                    .values
                    .extend_from_slice(&chunk.values[lo * meta.cols..hi * meta.cols]);
            }
        }
        if matrix.values.len() != matrix.rows * matrix.cols {
            return Err(Error::InvalidData(format!(
                "{}: assembled {} of {} values",
                level.path,
                matrix.values.len(),
                matrix.rows * matrix.cols
            )));
        }
        Ok(matrix)
    }

    /// Number of cached chunks across all factors.
    #[must_use]
    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }

    /// Whether the chunk `index` of `factor` is cached.
    #[must_use]
    pub fn is_cached(&self, factor: u32, index: u64) -> bool {
        self.meta.get().is_some_and(|meta| {
            self.cache
                .contains(&ChunkKey::with_factor(meta.resource.clone(), factor, index))
        })
    }
}

impl Drop for MultiscaleMatrixClient {
    fn drop(&mut self) {
        self.canceler.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chunkscope_io::{Dtype, MemoryDatasetReader};
    use serde_json::{json, Map};

    #[test]
    fn layout_parses_sibling_names() {
        let spikes = MultiscaleLayout::spike_density();
        assert_eq!(spikes.factor_of("spike_counts"), Some(1));
        assert_eq!(spikes.factor_of("spike_counts_ds_27"), Some(27));
        assert_eq!(spikes.factor_of("spike_counts_ds_"), None);
        assert_eq!(spikes.factor_of("spike_counts_ds_x"), None);
        let spec = MultiscaleLayout::spectrogram();
        assert_eq!(spec.factor_of("spectrogram_ds9"), Some(9));
        assert_eq!(spec.dataset_name(9), "spectrogram_ds9");
        assert_eq!(spec.factor_of("other"), None);
    }

    fn density_reader() -> Arc<MemoryDatasetReader> {
        let mut attrs = Map::new();
        attrs.insert("bin_size_sec".into(), json!(0.5));
        attrs.insert("start_time_sec".into(), json!(10.0));
        // 90 bins x 2 units, value = bin
        let base: Vec<f64> = (0..90).flat_map(|b| [f64::from(b), 0.0]).collect();
        let ds3: Vec<f64> = (0..30).flat_map(|b| [f64::from(b), 1.0]).collect();
        let ds9: Vec<f64> = (0..10).flat_map(|b| [f64::from(b), 2.0]).collect();
        Arc::new(
            MemoryDatasetReader::new()
                .with_dataset("/density/spike_counts", vec![90, 2], Dtype::U32, base, attrs)
                .with_dataset("/density/spike_counts_ds_3", vec![30, 2], Dtype::U32, ds3, Map::new())
                .with_dataset("/density/spike_counts_ds_9", vec![10, 2], Dtype::U32, ds9, Map::new()),
        )
    }

    #[tokio::test]
    async fn picks_factor_and_assembles_rows() {
        let reader = density_reader();
        let client = MultiscaleMatrixClient::new(
            reader.clone(),
            "/density",
            MultiscaleLayout::spike_density(),
            ClientConfig::default().with_chunk_size(4),
        );
        assert_eq!(client.factors().await.unwrap(), vec![1, 3, 9]);
        assert_eq!(client.time_range().await.unwrap(), (10.0, 55.0));

        // 20 base bins on 100 px: full resolution
        let fine = client.get_data(11.0, 21.0, 100).await.unwrap();
        assert_eq!(fine.factor, 1);
        assert_eq!(fine.rows, 20);
        assert_relative_eq!(fine.start_time, 11.0);
        assert_eq!(fine.get(0, 0), Some(2.0));
        assert_eq!(fine.column(1), vec![0.0; 20]);

        // 90 base bins on 18 px: 90/9 = 10 bins still exceeds 18/2
        let coarse = client.get_data(10.0, 55.0, 18).await.unwrap();
        assert_eq!(coarse.factor, 9);
        assert_eq!(coarse.rows, 10);
        assert_relative_eq!(coarse.bin_size, 4.5);
        assert_eq!(coarse.column(0), (0..10).map(f64::from).collect::<Vec<_>>());
        assert!(client.is_cached(9, 2));
        assert!(!client.is_cached(3, 0));
        // keys of different factors never alias
        assert!(client.is_cached(1, 2));
        assert!(!client.is_cached(3, 2));
    }

    #[tokio::test]
    async fn repeated_windows_hit_the_cache() {
        let reader = density_reader();
        let client = MultiscaleMatrixClient::new(
            reader.clone(),
            "/density",
            MultiscaleLayout::spike_density(),
            ClientConfig::default().with_chunk_size(4),
        );
        client.get_data(10.0, 20.0, 1000).await.unwrap();
        let reads = reader.read_count();
        let again = client.get_data(11.0, 19.0, 1000).await.unwrap();
        assert_eq!(again.rows, 16);
        assert_eq!(reader.read_count(), reads);
        assert_eq!(client.cached_chunks(), 5);
    }

    #[tokio::test]
    async fn spectrogram_time_axis_from_sampling_rate() {
        let mut attrs = Map::new();
        attrs.insert("spectrogram_sr_hz".into(), json!(4.0));
        let reader = Arc::new(
            MemoryDatasetReader::new()
                .with_group("/spec", attrs)
                .with_dataset("/spec/spectrogram", vec![8, 3], Dtype::U8, vec![7.0; 24], Map::new()),
        );
        let client = MultiscaleMatrixClient::new(
            reader,
            "/spec",
            MultiscaleLayout::spectrogram(),
            ClientConfig::default(),
        );
        assert_eq!(client.time_axis().await.unwrap(), (0.0, 0.25));
        let m = client.get_data(0.5, 1.0, 100).await.unwrap();
        assert_eq!((m.rows, m.cols), (2, 3));
        assert_relative_eq!(m.max_value(), 7.0);
    }

    #[tokio::test]
    async fn missing_base_dataset_fails_to_load() {
        let reader = Arc::new(MemoryDatasetReader::new().with_vec("/spec/other", vec![1.0]));
        let client = MultiscaleMatrixClient::new(
            reader,
            "/spec",
            MultiscaleLayout::spectrogram(),
            ClientConfig::default(),
        );
        assert!(client.load().await.is_err());
        assert!(matches!(client.status(), LoadStatus::Error(_)));
    }
}
