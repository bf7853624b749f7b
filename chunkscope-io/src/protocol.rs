//! Request/response messages of the file-sharing service.
//!
//! Every message is a JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version reported by servers built against this crate.
pub const PROTOCOL_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApiRequest {
    ProbeRequest,
    ReadDirRequest {
        path: String,
    },
    ReadFileRequest {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ServiceQueryRequest {
        service_name: String,
        query: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

impl ApiRequest {
    /// Short name used in logs and error contexts.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ProbeRequest => "probe".to_string(),
            Self::ReadDirRequest { path } => format!("readDir {path}"),
            Self::ReadFileRequest { path, start, end } => match (start, end) {
                (Some(s), Some(e)) => format!("readFile {path} [{s}, {e})"),
                _ => format!("readFile {path}"),
            },
            Self::ServiceQueryRequest { service_name, .. } => {
                format!("serviceQuery {service_name}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApiResponse {
    #[serde(rename_all = "camelCase")]
    ProbeResponse {
        protocol_version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proxy: Option<bool>,
    },
    ReadDirResponse {
        dirs: Vec<DirEntry>,
        files: Vec<FileInfo>,
    },
    ReadFileResponse,
    ServiceQueryResponse {
        result: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
}

/// File listing entry. Small files may carry their text inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mtime: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
