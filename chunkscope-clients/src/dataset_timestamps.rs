//! Timestamp model over a contiguous run of a one-dimensional dataset.

use chunkscope_core::{Canceler, ResourceId, Result, TimestampsModel};
use chunkscope_io::{DatasetReader, ReadOptions};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

/// Timestamps `[offset, offset + len)` of the dataset at `path`.
///
/// Spike-train units, irregular time bases and event series all expose
/// their times through this model.
pub struct DatasetTimestamps {
    reader: Arc<dyn DatasetReader>,
    path: String,
    resource: ResourceId,
    offset: usize,
    len: usize,
    canceler: Canceler,
}

impl DatasetTimestamps {
    /// Model the whole dataset.
    pub fn new(
        reader: Arc<dyn DatasetReader>,
        path: impl Into<String>,
        len: usize,
        canceler: Canceler,
    ) -> Self {
        let path = path.into();
        Self {
            reader,
            resource: ResourceId::new(&path),
            path,
            offset: 0,
            len,
            canceler,
        }
    }

    /// Restrict the model to `[offset, offset + len)` of the dataset; the
    /// resource identifier is suffixed with `slice` so caches stay distinct.
    #[must_use]
    pub fn slice(mut self, slice: impl std::fmt::Display, offset: usize, len: usize) -> Self {
        self.resource = self.resource.child(slice);
        self.offset = offset;
        self.len = len;
        self
    }

    /// Dataset path the timestamps are read from.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First dataset row covered by this model.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl TimestampsModel for DatasetTimestamps {
    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn len(&self) -> usize {
        self.len
    }

    fn get_chunk(&self, start: usize, end: usize) -> BoxFuture<'_, Result<Option<Vec<f64>>>> {
        let rows = self.offset + start..self.offset + end.min(self.len);
        let options = ReadOptions::rows(rows).with_canceler(self.canceler.clone());
        async move {
            let data = self
                .canceler
                .finish(self.reader.dataset_data(&self.path, options))
                .await?;
            Ok(Some(data.values))
        }
        .boxed()
    }
}
