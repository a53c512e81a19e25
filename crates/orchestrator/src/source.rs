//! Inbound payload sources.
//!
//! A source yields the payload's declared name and a byte stream. The
//! orchestrator sanitizes the name and copies the stream into temporary
//! storage; sources never touch the filesystem beyond their own input.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use futures_util::TryStreamExt;
use percent_encoding::percent_decode_str;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::OrchestratorError;

/// Byte stream of an inbound payload.
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// An opened inbound payload.
pub struct InboundPayload {
    /// Name as declared by the source (not yet sanitized).
    pub name: String,
    /// Expected size, when the source knows it up front.
    pub size_hint: Option<u64>,
    pub reader: PayloadReader,
}

/// Where a payload comes from.
pub trait InboundSource: Send + Sync {
    /// Opens the payload for streaming.
    fn open(&self) -> Pin<Box<dyn Future<Output = Result<InboundPayload, OrchestratorError>> + Send + '_>>;
}

/// A payload already on local disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: Option<String>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    /// Overrides the name taken from the path.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl InboundSource for FileSource {
    fn open(&self) -> Pin<Box<dyn Future<Output = Result<InboundPayload, OrchestratorError>> + Send + '_>> {
        Box::pin(async move {
            let source_err =
                |e: std::io::Error| OrchestratorError::Source(format!("{}: {e}", self.path.display()));

            let file = tokio::fs::File::open(&self.path).await.map_err(source_err)?;
            let size = file.metadata().await.map_err(source_err)?.len();

            let name = match &self.name {
                Some(name) => name.clone(),
                None => self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };

            Ok(InboundPayload {
                name,
                size_hint: Some(size),
                reader: Box::new(file),
            })
        })
    }
}

/// A payload downloaded over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: reqwest::Client,
    url: String,
    name: Option<String>,
}

impl HttpSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            name: None,
        }
    }

    /// Overrides the name taken from the URL's last path segment.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl InboundSource for HttpSource {
    fn open(&self) -> Pin<Box<dyn Future<Output = Result<InboundPayload, OrchestratorError>> + Send + '_>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(&self.url)
                .send()
                .await
                .map_err(|e| OrchestratorError::Source(format!("{}: {e}", self.url)))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(OrchestratorError::Source(format!(
                    "{}: HTTP {}",
                    self.url,
                    status.as_u16()
                )));
            }

            let name = match &self.name {
                Some(name) => name.clone(),
                None => name_from_url(resp.url()),
            };
            let size_hint = resp.content_length();
            debug!(url = %self.url, name = %name, size_hint, "inbound download started");

            let stream = resp.bytes_stream().map_err(std::io::Error::other);
            Ok(InboundPayload {
                name,
                size_hint,
                reader: Box::new(StreamReader::new(Box::pin(stream))),
            })
        })
    }
}

/// Last non-empty path segment, percent-decoded.
fn name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .unwrap_or_default()
}
