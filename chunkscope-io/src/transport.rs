//! Transports carrying protocol requests to a file-sharing service.

use crate::frame::{decode_reply, ApiReply};
use crate::protocol::ApiRequest;
use crate::{Error, Result};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use std::ops::Range;
use std::time::Duration;

/// Carries [`ApiRequest`]s to a server and returns framed replies.
pub trait ApiTransport: Send + Sync {
    /// Send one request.
    fn post(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiReply>>;

    /// Read an absolute `http(s)` URL, optionally restricted to a byte range.
    fn read_url<'a>(&'a self, url: &'a str, _range: Option<Range<u64>>) -> BoxFuture<'a, Result<Bytes>> {
        async move {
            Err(Error::Protocol(format!(
                "this transport cannot read URL {url}"
            )))
        }
        .boxed()
    }

    /// Check that a URL is reachable, returning its status code.
    fn probe_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u16>> {
        async move {
            Err(Error::Protocol(format!(
                "this transport cannot probe URL {url}"
            )))
        }
        .boxed()
    }
}

/// Returns true for absolute `http://` or `https://` paths.
#[must_use]
pub fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Endpoint that accepts POSTed requests.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Identity attached to service queries.
    pub user_id: Option<String>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:61752/api".to_string(),
            timeout: Duration::from_secs(60),
            user_id: None,
            user_agent: format!("chunkscope/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the request timeout (at least one second).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Fallible variant of [`Self::with_endpoint`].
    ///
    /// # Errors
    /// Returns an error unless the endpoint is an `http(s)` URL.
    pub fn try_with_endpoint(self, endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if !is_url(&endpoint) {
            return Err(Error::InvalidPath(format!(
                "endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        Ok(self.with_endpoint(endpoint))
    }
}

/// Transport that POSTs JSON requests with `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    config: TransportConfig,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for `config.endpoint`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn post_impl(&self, request: ApiRequest) -> Result<ApiReply> {
        let request = match request {
            ApiRequest::ServiceQueryRequest {
                service_name,
                query,
                user_id: None,
            } => ApiRequest::ServiceQueryRequest {
                service_name,
                query,
                user_id: self.config.user_id.clone(),
            },
            other => other,
        };
        let context = request.describe();
        log::debug!("POST {} ({context})", self.config.endpoint);
        let resp = self
            .http
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(Error::Status {
                status: resp.status().as_u16(),
                context,
            });
        }
        let body = resp.bytes().await?;
        decode_reply(&body)
    }

    async fn read_url_impl(&self, url: &str, range: Option<Range<u64>>) -> Result<Bytes> {
        let mut request = self.http.get(url);
        if let Some(range) = &range {
            if range.end <= range.start {
                return Ok(Bytes::new());
            }
            request = request.header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", range.start, range.end - 1),
            );
        }
        let resp = request.send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(Error::Status {
                status: status.as_u16(),
                context: url.to_string(),
            });
        }
        let body = resp.bytes().await?;
        // A server that ignores the Range header sends the whole file.
        match range {
            Some(range) if status == reqwest::StatusCode::OK => {
                let len = body.len();
                let start = usize::try_from(range.start).unwrap_or(len).min(len);
                let end = usize::try_from(range.end).unwrap_or(len).min(len);
                Ok(body.slice(start..end.max(start)))
            }
            _ => Ok(body),
        }
    }

    async fn probe_url_impl(&self, url: &str) -> Result<u16> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status().as_u16();
        // dropping the response abandons the body after the headers
        drop(resp);
        Ok(status)
    }
}

impl ApiTransport for HttpTransport {
    fn post(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiReply>> {
        self.post_impl(request).boxed()
    }

    fn read_url<'a>(&'a self, url: &'a str, range: Option<Range<u64>>) -> BoxFuture<'a, Result<Bytes>> {
        self.read_url_impl(url, range).boxed()
    }

    fn probe_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u16>> {
        self.probe_url_impl(url).boxed()
    }
}
