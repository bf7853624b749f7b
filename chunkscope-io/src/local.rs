//! In-process transport serving a local directory.
//!
//! File reads go through memory-mapped files so ranged requests touch only
//! the pages they need. Service queries are dispatched to registered
//! [`ServiceHandler`]s by name.

use crate::frame::ApiReply;
use crate::protocol::{ApiRequest, ApiResponse, DirEntry, FileInfo, PROTOCOL_VERSION};
use crate::transport::ApiTransport;
use crate::{Error, Result};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use memmap2::Mmap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// A memory-mapped file.
pub struct MappedFile {
    mmap: Option<Mmap>,
    path: PathBuf,
}

impl MappedFile {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            // This is the standard safety contract for memory mapping.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            Some(mmap)
        };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy out bytes `[start, end)`, clipped to the file size.
    #[must_use]
    pub fn read_range(&self, start: u64, end: u64) -> Bytes {
        let bytes = self.as_bytes();
        let len = bytes.len();
        let start = usize::try_from(start).unwrap_or(len).min(len);
        let end = usize::try_from(end).unwrap_or(len).min(len).max(start);
        Bytes::copy_from_slice(&bytes[start..end])
    }
}

/// Handles queries for one named service.
pub trait ServiceHandler: Send + Sync {
    /// Answer `query` with a JSON result and an optional binary payload.
    ///
    /// # Errors
    /// Returns an error for malformed or failing queries.
    fn handle(&self, query: &Value) -> Result<(Value, Option<Bytes>)>;
}

/// [`ApiTransport`] over a local directory.
#[derive(Clone)]
pub struct LocalTransport {
    root: PathBuf,
    services: Arc<RwLock<HashMap<String, Arc<dyn ServiceHandler>>>>,
}

impl LocalTransport {
    /// Serve the directory at `root`.
    ///
    /// # Errors
    /// Returns an error if `root` is not a directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            services: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register (or replace) the handler for `name`.
    pub fn register_service(&self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        self.services.write().insert(name.into(), handler);
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn read_dir(&self, path: &str) -> Result<ApiResponse> {
        let dir = self.resolve(path)?;
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                dirs.push(DirEntry { name });
            } else if meta.is_file() {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
                files.push(FileInfo {
                    name,
                    size: meta.len(),
                    mtime,
                    content: None,
                });
            }
        }
        dirs.sort_by(|a, b| a.name.cmp(&b.name));
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ApiResponse::ReadDirResponse { dirs, files })
    }

    fn read_file(&self, path: &str, start: Option<u64>, end: Option<u64>) -> Result<Bytes> {
        let file = MappedFile::open(self.resolve(path)?)?;
        let len = u64::try_from(file.len()).unwrap_or(u64::MAX);
        Ok(file.read_range(start.unwrap_or(0), end.unwrap_or(len)))
    }

    fn handle(&self, request: ApiRequest) -> Result<ApiReply> {
        log::debug!("local {}", request.describe());
        match request {
            ApiRequest::ProbeRequest => Ok(ApiReply::new(
                ApiResponse::ProbeResponse {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    proxy: Some(false),
                },
                None,
            )),
            ApiRequest::ReadDirRequest { path } => Ok(ApiReply::new(self.read_dir(&path)?, None)),
            ApiRequest::ReadFileRequest { path, start, end } => Ok(ApiReply::new(
                ApiResponse::ReadFileResponse,
                Some(self.read_file(&path, start, end)?),
            )),
            ApiRequest::ServiceQueryRequest {
                service_name,
                query,
                ..
            } => {
                let handler = self
                    .services
                    .read()
                    .get(&service_name)
                    .cloned()
                    .ok_or_else(|| Error::Protocol(format!("unknown service: {service_name}")))?;
                let (result, payload) = handler.handle(&query)?;
                Ok(ApiReply::new(
                    ApiResponse::ServiceQueryResponse { result },
                    payload,
                ))
            }
        }
    }
}

impl ApiTransport for LocalTransport {
    fn post(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiReply>> {
        async move { self.handle(request) }.boxed()
    }
}
