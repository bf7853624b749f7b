//! Client for the file-sharing service: directory tree, file reads and
//! service queries.
//!
//! Directory listings are fetched lazily and kept for the lifetime of the
//! client. Concurrent retrievals of the same directory share one request.

use crate::frame::ApiReply;
use crate::protocol::{ApiRequest, ApiResponse, DirEntry, FileInfo};
use crate::transport::{is_url, ApiTransport};
use crate::{Error, Result};
use bytes::Bytes;
use chunkscope_core::{ChunkCache, FailurePolicy, RetryPolicy};
use parking_lot::Mutex;
use serde_json::Value;
use std::ops::Range;
use std::sync::Arc;

/// A file in the directory tree, with whole-file content once read.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub mtime: f64,
    pub content: Option<Bytes>,
}

impl From<FileInfo> for FileEntry {
    fn from(info: FileInfo) -> Self {
        Self {
            name: info.name,
            size: info.size,
            mtime: info.mtime,
            content: info.content.map(Bytes::from),
        }
    }
}

/// A directory whose children are populated on first listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectoryNode {
    pub name: String,
    pub dirs: Option<Vec<DirectoryNode>>,
    pub files: Option<Vec<FileEntry>>,
}

impl DirectoryNode {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dirs: None,
            files: None,
        }
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.dirs.is_some() && self.files.is_some()
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.as_ref()?.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn dir(&self, name: &str) -> Option<&DirectoryNode> {
        self.dirs.as_ref()?.iter().find(|d| d.name == name)
    }

    fn dir_mut(&mut self, name: &str) -> Option<&mut DirectoryNode> {
        self.dirs.as_mut()?.iter_mut().find(|d| d.name == name)
    }

    fn descend_mut(&mut self, parts: &[&str]) -> Option<&mut DirectoryNode> {
        let mut node = self;
        for part in parts {
            node = node.dir_mut(part)?;
        }
        Some(node)
    }

    fn descend(&self, parts: &[&str]) -> Option<&DirectoryNode> {
        let mut node = self;
        for part in parts {
            node = node.dir(part)?;
        }
        Some(node)
    }
}

/// Result of a service query.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceReply {
    pub result: Value,
    pub payload: Option<Bytes>,
}

/// Server identification returned by [`FileSystemClient::probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    pub protocol_version: String,
    pub proxy: bool,
}

type Listing = (Vec<DirEntry>, Vec<FileInfo>);

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty() && *p != ".").collect()
}

/// File system view of a remote (or local) file-sharing service.
pub struct FileSystemClient {
    transport: Arc<dyn ApiTransport>,
    root: Mutex<DirectoryNode>,
    listings: ChunkCache<String, Listing>,
}

impl FileSystemClient {
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        Self {
            transport,
            root: Mutex::new(DirectoryNode::new("")),
            listings: ChunkCache::new(RetryPolicy::default(), FailurePolicy::Retry),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn ApiTransport> {
        &self.transport
    }

    /// Ask the server for its protocol version.
    ///
    /// # Errors
    /// Returns an error if the request fails or the reply is not a probe response.
    pub async fn probe(&self) -> Result<ProbeInfo> {
        match self.transport.post(ApiRequest::ProbeRequest).await?.header {
            ApiResponse::ProbeResponse {
                protocol_version,
                proxy,
            } => Ok(ProbeInfo {
                protocol_version,
                proxy: proxy.unwrap_or(false),
            }),
            other => Err(unexpected("probeResponse", &other)),
        }
    }

    /// Check that an absolute URL is reachable.
    ///
    /// # Errors
    /// Returns an error if the transport cannot reach the URL.
    pub async fn probe_url(&self, url: &str) -> Result<u16> {
        self.transport.probe_url(url).await
    }

    /// List the directory at `path` (`""` is the root).
    ///
    /// Every ancestor is listed first, so a missing component is reported as
    /// not found without querying the server for deeper paths.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPath`] for a path whose ancestor lacks the
    /// next component, or a transport error.
    pub async fn read_dir(&self, path: &str) -> Result<DirectoryNode> {
        let parts = split_path(path);
        for depth in 0..=parts.len() {
            self.ensure_listed(&parts[..depth]).await?;
            if depth < parts.len() {
                let root = self.root.lock();
                let exists = root
                    .descend(&parts[..depth])
                    .and_then(|node| node.dir(parts[depth]))
                    .is_some();
                if !exists {
                    return Err(Error::InvalidPath(format!(
                        "no directory {} in /{}",
                        parts[depth],
                        parts[..depth].join("/")
                    )));
                }
            }
        }
        let root = self.root.lock();
        root.descend(&parts)
            .cloned()
            .ok_or_else(|| Error::InvalidPath(path.to_string()))
    }

    async fn ensure_listed(&self, parts: &[&str]) -> Result<()> {
        if self
            .root
            .lock()
            .descend(parts)
            .is_some_and(DirectoryNode::is_populated)
        {
            return Ok(());
        }
        let path = parts.join("/");
        let transport = Arc::clone(&self.transport);
        let request_path = path.clone();
        let listing = self
            .listings
            .get(path.clone(), move || {
                let transport = Arc::clone(&transport);
                let path = request_path.clone();
                async move {
                    let reply = transport
                        .post(ApiRequest::ReadDirRequest { path })
                        .await
                        .map_err(chunkscope_core::Error::from)?;
                    match reply.header {
                        ApiResponse::ReadDirResponse { dirs, files } => Ok((dirs, files)),
                        other => Err(unexpected("readDirResponse", &other).into()),
                    }
                }
            })
            .await?;

        let mut root = self.root.lock();
        if let Some(node) = root.descend_mut(parts) {
            if !node.is_populated() {
                let (dirs, files) = &*listing;
                node.dirs = Some(dirs.iter().map(|d| DirectoryNode::new(&d.name)).collect());
                node.files = Some(files.iter().cloned().map(FileEntry::from).collect());
                log::debug!(
                    "listed /{path}: {} dirs, {} files",
                    dirs.len(),
                    files.len()
                );
            }
        }
        Ok(())
    }

    /// Read a file, or bytes `[range.start, range.end)` of it.
    ///
    /// `http(s)` URLs are fetched directly. Other paths must appear in their
    /// parent listing; whole-file reads are memoized and later reads are
    /// served from memory unless `force_reload` is set.
    ///
    /// # Errors
    /// Returns an error if the file is not listed or the read fails.
    pub async fn read_file(
        &self,
        path: &str,
        range: Option<Range<u64>>,
        force_reload: bool,
    ) -> Result<Bytes> {
        if is_url(path) {
            return self.transport.read_url(path, range).await;
        }
        let parts = split_path(path);
        let Some((name, parent)) = parts.split_last() else {
            return Err(Error::InvalidPath(path.to_string()));
        };
        let dir = self.read_dir(&parent.join("/")).await?;
        let entry = dir
            .file(name)
            .ok_or_else(|| Error::InvalidPath(format!("no file {path}")))?;

        if !force_reload {
            if let Some(content) = &entry.content {
                return Ok(slice_range(content, range.as_ref()));
            }
        }

        let (start, end) = match &range {
            Some(r) => (Some(r.start), Some(r.end)),
            None => (None, None),
        };
        let reply = self
            .transport
            .post(ApiRequest::ReadFileRequest {
                path: parts.join("/"),
                start,
                end,
            })
            .await?;
        let content = expect_file(reply)?;

        if range.is_none() {
            let mut root = self.root.lock();
            if let Some(file) = root
                .descend_mut(parent)
                .and_then(|d| d.files.as_mut())
                .and_then(|files| files.iter_mut().find(|f| f.name == *name))
            {
                file.content = Some(content.clone());
            }
        }
        Ok(content)
    }

    /// Run a query against a named server-side service.
    ///
    /// # Errors
    /// Returns an error if the request fails or the reply is malformed.
    pub async fn service_query(&self, service_name: &str, query: Value) -> Result<ServiceReply> {
        let reply = self
            .transport
            .post(ApiRequest::ServiceQueryRequest {
                service_name: service_name.to_string(),
                query,
                user_id: None,
            })
            .await?;
        match reply.header {
            ApiResponse::ServiceQueryResponse { result } => Ok(ServiceReply {
                result,
                payload: reply.payload,
            }),
            other => Err(unexpected("serviceQueryResponse", &other)),
        }
    }
}

fn expect_file(reply: ApiReply) -> Result<Bytes> {
    match reply.header {
        ApiResponse::ReadFileResponse => Ok(reply.payload.unwrap_or_default()),
        other => Err(unexpected("readFileResponse", &other)),
    }
}

fn unexpected(expected: &str, got: &ApiResponse) -> Error {
    Error::Protocol(format!("expected {expected}, got {got:?}"))
}

fn slice_range(content: &Bytes, range: Option<&Range<u64>>) -> Bytes {
    match range {
        None => content.clone(),
        Some(r) => {
            let len = content.len();
            let start = usize::try_from(r.start).unwrap_or(len).min(len);
            let end = usize::try_from(r.end).unwrap_or(len).min(len).max(start);
            content.slice(start..end)
        }
    }
}
