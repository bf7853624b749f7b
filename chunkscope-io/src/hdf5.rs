//! [`DatasetReader`] over a local HDF5 file.

use crate::dataset::{ArrayData, DatasetInfo, DatasetReader, Dtype, GroupInfo, ReadOptions};
use crate::Error;
use chunkscope_core::Result;
use futures::future::{self, BoxFuture, FutureExt};
use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use hdf5::{Attribute, Dataset, File, Group, Location};
use ndarray::s;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::Path;

/// Reads datasets from an HDF5 file on disk.
pub struct Hdf5DatasetReader {
    file: Mutex<File>,
}

impl Hdf5DatasetReader {
    /// Open `path` read-only.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn dataset(&self, path: &str) -> Result<Dataset> {
        let file = self.file.lock();
        if !file.link_exists(path) {
            return Err(chunkscope_core::Error::NotFound(path.to_string()));
        }
        Ok(file.dataset(path).map_err(Error::from)?)
    }

    fn group(&self, path: &str) -> Result<Group> {
        let file = self.file.lock();
        if path.trim_matches('/').is_empty() {
            return Ok(file.group("/").map_err(Error::from)?);
        }
        if !file.link_exists(path) {
            return Err(chunkscope_core::Error::NotFound(path.to_string()));
        }
        Ok(file.group(path).map_err(Error::from)?)
    }

    fn info_sync(&self, path: &str) -> Result<DatasetInfo> {
        let ds = self.dataset(path)?;
        let descriptor = ds.dtype().and_then(|t| t.to_descriptor()).map_err(Error::from)?;
        Ok(DatasetInfo {
            shape: ds.shape(),
            dtype: dtype_of(&descriptor)?,
            attrs: read_attrs(&ds)?,
        })
    }

    fn data_sync(&self, path: &str, options: &ReadOptions) -> Result<ArrayData> {
        options.check_canceled()?;
        let ds = self.dataset(path)?;
        let shape = ds.shape();
        let ranges = options.resolve(&shape);
        let out_shape: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
        if out_shape.iter().any(|&n| n == 0) {
            return Ok(ArrayData::new(out_shape, Vec::new()));
        }
        let values = match ranges.as_slice() {
            [] => vec![ds.read_scalar::<f64>().map_err(Error::from)?],
            [r] => ds
                .read_slice_1d::<f64, _>(s![r.start..r.end])
                .map_err(Error::from)?
                .to_vec(),
            [r0, r1] => {
                let block = ds
                    .read_slice_2d::<f64, _>(s![r0.start..r0.end, r1.start..r1.end])
                    .map_err(Error::from)?;
                block.iter().copied().collect()
            }
            _ => {
                return Err(chunkscope_core::Error::InvalidData(format!(
                    "{path}: {}-dimensional datasets are not supported",
                    shape.len()
                )))
            }
        };
        Ok(ArrayData::new(out_shape, values))
    }

    fn group_sync(&self, path: &str) -> Result<GroupInfo> {
        let group = self.group(path)?;
        let last = |name: String| name.rsplit('/').next().unwrap_or_default().to_string();
        let subgroups = group
            .groups()
            .map_err(Error::from)?
            .into_iter()
            .map(|g| last(g.name()))
            .collect();
        let datasets = group
            .datasets()
            .map_err(Error::from)?
            .into_iter()
            .map(|d| last(d.name()))
            .collect();
        Ok(GroupInfo {
            subgroups,
            datasets,
            attrs: read_attrs(&group)?,
        })
    }
}

fn dtype_of(descriptor: &TypeDescriptor) -> Result<Dtype> {
    let dtype = match descriptor {
        TypeDescriptor::Unsigned(IntSize::U1) | TypeDescriptor::Boolean => Dtype::U8,
        TypeDescriptor::Unsigned(IntSize::U2) => Dtype::U16,
        TypeDescriptor::Unsigned(IntSize::U4) => Dtype::U32,
        TypeDescriptor::Unsigned(IntSize::U8) => Dtype::U64,
        TypeDescriptor::Integer(IntSize::U1 | IntSize::U2) => Dtype::I16,
        TypeDescriptor::Integer(IntSize::U4) => Dtype::I32,
        TypeDescriptor::Integer(IntSize::U8) => Dtype::I64,
        TypeDescriptor::Float(FloatSize::U4) => Dtype::F32,
        TypeDescriptor::Float(FloatSize::U8) => Dtype::F64,
        other => {
            return Err(chunkscope_core::Error::InvalidData(format!(
                "unsupported HDF5 type {other:?}"
            )))
        }
    };
    Ok(dtype)
}

fn attr_value(attr: &Attribute) -> Option<Value> {
    if let Ok(v) = attr.read_scalar::<f64>() {
        return Some(Value::from(v));
    }
    if let Ok(v) = attr.read_scalar::<hdf5::types::VarLenUnicode>() {
        return Some(Value::from(v.to_string()));
    }
    attr.read_raw::<f64>().ok().map(Value::from)
}

fn read_attrs(location: &Location) -> Result<Map<String, Value>> {
    let mut attrs = Map::new();
    for name in location.attr_names().map_err(Error::from)? {
        if let Some(value) = location.attr(&name).ok().as_ref().and_then(attr_value) {
            attrs.insert(name, value);
        }
    }
    Ok(attrs)
}

impl DatasetReader for Hdf5DatasetReader {
    fn dataset_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<DatasetInfo>> {
        future::ready(self.info_sync(path)).boxed()
    }

    fn dataset_data<'a>(
        &'a self,
        path: &'a str,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<ArrayData>> {
        future::ready(self.data_sync(path, &options)).boxed()
    }

    fn group_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<GroupInfo>> {
        future::ready(self.group_sync(path)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn reads_slices_and_attributes() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = File::create(tmp.path()).unwrap();
            let units = file.create_group("units").unwrap();
            let ds = units
                .new_dataset_builder()
                .with_data(&[0.5f64, 1.5, 2.5, 3.5])
                .create("spike_times")
                .unwrap();
            ds.new_attr::<f64>()
                .create("resolution")
                .unwrap()
                .write_scalar(&0.001)
                .unwrap();
            units
                .new_dataset_builder()
                .with_data(&[2i64, 4])
                .create("spike_times_index")
                .unwrap();
        }

        let reader = Hdf5DatasetReader::open(tmp.path()).unwrap();
        let info = reader.dataset_info("/units/spike_times").await.unwrap();
        assert_eq!(info.shape, vec![4]);
        assert_eq!(info.dtype, Dtype::F64);
        assert_eq!(info.attr_f64("resolution"), Some(0.001));

        let block = reader
            .dataset_data("/units/spike_times", ReadOptions::rows(1..3))
            .await
            .unwrap();
        assert_eq!(block.values, vec![1.5, 2.5]);

        let index = reader
            .dataset_data("/units/spike_times_index", ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(index.values, vec![2.0, 4.0]);

        let group = reader.group_info("/units").await.unwrap();
        assert!(group.has_dataset("spike_times_index"));
        assert!(reader.dataset_info("/units/missing").await.is_err());
    }
}
