//! In-process [`DatasetReader`] for tests, demos and fixtures.
//!
//! Datasets are plain row-major `f64` buffers. Every block read is counted,
//! and reads of a path can be made to fail a given number of times.

use crate::dataset::{ArrayData, DatasetInfo, DatasetReader, Dtype, GroupInfo, ReadOptions};
use chunkscope_core::{Error, Result};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct StoredDataset {
    info: DatasetInfo,
    values: Vec<f64>,
}

fn parent_and_name(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => ("/".to_string(), trimmed.trim_start_matches('/').to_string()),
        Some(pos) => (trimmed[..pos].to_string(), trimmed[pos + 1..].to_string()),
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// Dataset reader over in-memory arrays.
#[derive(Default)]
pub struct MemoryDatasetReader {
    datasets: BTreeMap<String, StoredDataset>,
    groups: BTreeMap<String, GroupInfo>,
    reads: AtomicUsize,
    reads_by_path: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
}

impl MemoryDatasetReader {
    #[must_use]
    pub fn new() -> Self {
        let mut reader = Self::default();
        reader.groups.insert("/".to_string(), GroupInfo::default());
        reader
    }

    /// Delay every block read, so concurrent callers overlap.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add a group (and its ancestors) with attributes.
    #[must_use]
    pub fn with_group(mut self, path: &str, attrs: Map<String, Value>) -> Self {
        self.ensure_group(&normalize(path));
        if let Some(group) = self.groups.get_mut(&normalize(path)) {
            group.attrs.extend(attrs);
        }
        self
    }

    /// Add a dataset; parent groups are created as needed.
    ///
    /// # Panics
    /// Panics if `values` does not match `shape`; fixtures are built by tests.
    #[must_use]
    pub fn with_dataset(
        mut self,
        path: &str,
        shape: Vec<usize>,
        dtype: Dtype,
        values: Vec<f64>,
        attrs: Map<String, Value>,
    ) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(values.len(), expected, "fixture {path} does not match its shape");
        let path = normalize(path);
        let (parent, name) = parent_and_name(&path);
        self.ensure_group(&parent);
        if let Some(group) = self.groups.get_mut(&parent) {
            if !group.has_dataset(&name) {
                group.datasets.push(name);
            }
        }
        self.datasets.insert(
            path,
            StoredDataset {
                info: DatasetInfo {
                    shape,
                    dtype,
                    attrs,
                },
                values,
            },
        );
        self
    }

    /// One-dimensional `f64` dataset without attributes.
    #[must_use]
    pub fn with_vec(self, path: &str, values: Vec<f64>) -> Self {
        let len = values.len();
        self.with_dataset(path, vec![len], Dtype::F64, values, Map::new())
    }

    fn ensure_group(&mut self, path: &str) {
        if self.groups.contains_key(path) {
            return;
        }
        let (parent, name) = parent_and_name(path);
        self.ensure_group(&parent);
        if let Some(group) = self.groups.get_mut(&parent) {
            if !group.subgroups.contains(&name) {
                group.subgroups.push(name);
            }
        }
        self.groups.insert(path.to_string(), GroupInfo::default());
    }

    /// Make the next `count` block reads of `path` fail with a transport error.
    pub fn fail_next(&self, path: &str, count: usize) {
        self.failures.lock().insert(normalize(path), count);
    }

    /// Total block reads served (including injected failures).
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn read_count_for(&self, path: &str) -> usize {
        self.reads_by_path
            .lock()
            .get(&normalize(path))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.reads_by_path.lock().clear();
    }

    fn extract(stored: &StoredDataset, ranges: &[Range<usize>]) -> ArrayData {
        let shape: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
        let total: usize = shape.iter().product();
        let dims = stored.info.shape.len();
        if total == 0 || dims == 0 {
            let values = if dims == 0 {
                stored.values.clone()
            } else {
                Vec::new()
            };
            return ArrayData::new(shape, values);
        }
        let mut strides = vec![1usize; dims];
        for d in (0..dims - 1).rev() {
            strides[d] = strides[d + 1] * stored.info.shape[d + 1];
        }
        let mut values = Vec::with_capacity(total);
        let mut index: Vec<usize> = ranges.iter().map(|r| r.start).collect();
        loop {
            let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
            values.push(stored.values[offset]);
            // odometer increment, last dimension fastest
            let mut d = dims;
            loop {
                if d == 0 {
                    return ArrayData::new(shape, values);
                }
                d -= 1;
                index[d] += 1;
                if index[d] < ranges[d].end {
                    break;
                }
                index[d] = ranges[d].start;
            }
        }
    }

    async fn data_impl(&self, path: &str, options: ReadOptions) -> Result<ArrayData> {
        let path = normalize(path);
        let stored = self
            .datasets
            .get(&path)
            .ok_or_else(|| Error::NotFound(path.clone()))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.reads_by_path.lock().entry(path.clone()).or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        options.check_canceled()?;
        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::transport(&path, "injected failure"));
                }
            }
        }
        let ranges = options.resolve(&stored.info.shape);
        Ok(Self::extract(stored, &ranges))
    }
}

impl DatasetReader for MemoryDatasetReader {
    fn dataset_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<DatasetInfo>> {
        let out = self
            .datasets
            .get(&normalize(path))
            .map(|d| d.info.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()));
        async move { out }.boxed()
    }

    fn dataset_data<'a>(
        &'a self,
        path: &'a str,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<ArrayData>> {
        self.data_impl(path, options).boxed()
    }

    fn group_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<GroupInfo>> {
        let out = self
            .groups
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()));
        async move { out }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> MemoryDatasetReader {
        let values: Vec<f64> = (0..12).map(f64::from).collect();
        MemoryDatasetReader::new().with_dataset(
            "/acquisition/roi/data",
            vec![4, 3],
            Dtype::F32,
            values,
            Map::new(),
        )
    }

    #[tokio::test]
    async fn two_dimensional_slices() {
        let reader = matrix();
        let block = reader
            .dataset_data(
                "/acquisition/roi/data",
                ReadOptions {
                    slice: Some(vec![1..3, 1..3]),
                    canceler: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(block.shape, vec![2, 2]);
        assert_eq!(block.values, vec![4.0, 5.0, 7.0, 8.0]);
        assert_eq!(reader.read_count_for("acquisition/roi/data"), 1);
    }

    #[tokio::test]
    async fn groups_are_created_for_datasets() {
        let reader = matrix();
        let root = reader.group_info("/").await.unwrap();
        assert_eq!(root.subgroups, vec!["acquisition".to_string()]);
        let roi = reader.group_info("/acquisition/roi").await.unwrap();
        assert!(roi.has_dataset("data"));
        assert!(reader.group_info("/nope").await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let reader = MemoryDatasetReader::new().with_vec("/t", vec![1.0, 2.0]);
        reader.fail_next("/t", 1);
        assert!(reader.dataset_data("/t", ReadOptions::default()).await.is_err());
        assert!(reader.dataset_data("/t", ReadOptions::default()).await.is_ok());
        assert_eq!(reader.read_count(), 2);
    }
}
