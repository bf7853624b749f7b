//! [`DatasetReader`] backed by the server-side `zarr` service.
//!
//! Array metadata and blocks come from service queries; group structure and
//! attributes are read from the zarr store layout (`.zgroup`, `.zarray`,
//! `.zattrs`) through the file system client.

use crate::dataset::{decode_block, ArrayData, DatasetInfo, DatasetReader, Dtype, GroupInfo, ReadOptions};
use crate::filesystem::FileSystemClient;
use chunkscope_core::{Error, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Service name the array queries are addressed to.
pub const ZARR_SERVICE: &str = "zarr";

/// URI scheme prefix of files served by the file-sharing service.
pub const URI_PREFIX: &str = "rtcshare://";

#[derive(Debug, Deserialize)]
struct ArrayInfoResult {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    shape: Vec<usize>,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    attrs: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ArrayChunkResult {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    shape: Option<Vec<usize>>,
}

fn default_success() -> bool {
    true
}

/// Reads arrays of one zarr store through the `zarr` service.
pub struct ServiceDatasetReader {
    client: Arc<FileSystemClient>,
    uri: String,
}

impl ServiceDatasetReader {
    /// `uri` names the store, with or without the `rtcshare://` prefix.
    pub fn new(client: Arc<FileSystemClient>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let uri = if uri.starts_with(URI_PREFIX) {
            uri
        } else {
            format!("{URI_PREFIX}{}", uri.trim_start_matches('/'))
        };
        Self { client, uri }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn store_path(&self, name: &str) -> String {
        let base = self.uri.trim_start_matches(URI_PREFIX).trim_end_matches('/');
        let name = name.trim_matches('/');
        if name.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{name}")
        }
    }

    async fn query(&self, query: Value) -> Result<(Value, Option<bytes::Bytes>)> {
        let reply = self.client.service_query(ZARR_SERVICE, query).await?;
        Ok((reply.result, reply.payload))
    }

    async fn info_impl(&self, name: &str) -> Result<DatasetInfo> {
        let (result, _) = self
            .query(json!({"type": "get_array_info", "path": self.uri, "name": name}))
            .await?;
        let info: ArrayInfoResult = serde_json::from_value(result)
            .map_err(|e| Error::InvalidData(format!("array info for {name}: {e}")))?;
        if !info.success {
            return Err(Error::NotFound(format!(
                "{name}: {}",
                info.error.unwrap_or_else(|| "no such array".to_string())
            )));
        }
        let dtype = Dtype::parse(info.dtype.as_deref().unwrap_or("float64"))?;
        Ok(DatasetInfo {
            shape: info.shape,
            dtype,
            attrs: info.attrs,
        })
    }

    async fn data_impl(&self, name: &str, options: ReadOptions) -> Result<ArrayData> {
        let info = self.info_impl(name).await?;
        options.check_canceled()?;
        let ranges = options.resolve(&info.shape);
        let shape: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
        if shape.iter().any(|&n| n == 0) {
            return Ok(ArrayData::new(shape, Vec::new()));
        }
        let slices: Vec<Value> = ranges
            .iter()
            .map(|r| json!({"start": r.start, "stop": r.end, "step": 1}))
            .collect();
        let (result, payload) = self
            .query(json!({
                "type": "get_array_chunk",
                "path": self.uri,
                "name": name,
                "slices": slices,
            }))
            .await?;
        options.check_canceled()?;

        let chunk: ArrayChunkResult = serde_json::from_value(result)
            .map_err(|e| Error::InvalidData(format!("array chunk for {name}: {e}")))?;
        if !chunk.success {
            return Err(Error::transport(
                name,
                chunk.error.unwrap_or_else(|| "get_array_chunk failed".to_string()),
            ));
        }
        let dtype = match chunk.dtype.as_deref() {
            Some(d) => Dtype::parse(d)?,
            None => info.dtype,
        };
        let payload = payload.ok_or_else(|| {
            Error::InvalidData(format!("no binary payload for {name}"))
        })?;
        decode_block(dtype, chunk.shape.unwrap_or(shape), &payload)
    }

    async fn read_attrs(&self, name: &str) -> Result<Map<String, Value>> {
        let path = format!("{}/.zattrs", self.store_path(name));
        match self.client.read_file(&path, None, false).await {
            Ok(buf) => {
                let value: Value = serde_json::from_slice(&buf)
                    .map_err(|e| Error::InvalidData(format!("{path}: {e}")))?;
                Ok(value.as_object().cloned().unwrap_or_default())
            }
            Err(crate::Error::InvalidPath(_)) => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn group_impl(&self, name: &str) -> Result<GroupInfo> {
        let dir_path = self.store_path(name);
        let dir = self.client.read_dir(&dir_path).await?;
        if dir.file(".zgroup").is_none() {
            return Err(Error::NotFound(format!("{name} is not a zarr group")));
        }
        let mut info = GroupInfo {
            attrs: self.read_attrs(name).await?,
            ..GroupInfo::default()
        };
        for child in dir.dirs.iter().flatten() {
            let child_dir = self
                .client
                .read_dir(&format!("{dir_path}/{}", child.name))
                .await?;
            if child_dir.file(".zarray").is_some() {
                info.datasets.push(child.name.clone());
            } else if child_dir.file(".zgroup").is_some() {
                info.subgroups.push(child.name.clone());
            }
        }
        Ok(info)
    }
}

impl DatasetReader for ServiceDatasetReader {
    fn dataset_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<DatasetInfo>> {
        self.info_impl(path).boxed()
    }

    fn dataset_data<'a>(
        &'a self,
        path: &'a str,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<ArrayData>> {
        self.data_impl(path, options).boxed()
    }

    fn group_info<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<GroupInfo>> {
        self.group_impl(path).boxed()
    }
}
