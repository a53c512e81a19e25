//! Relay HTTP client.
//!
//! Async client using `reqwest`. The HTTP client is supplied by the caller
//! so connection pools are shared explicitly, never through a global.

use std::path::Path;

use apkrelay_protocol::constants::{FILES_ROUTE, UPLOAD_ROUTE};
use apkrelay_protocol::{ErrorResponse, RetrievalHandle, StageResponse};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::encode_segment;
use crate::error::RelayError;

/// Client for the staging relay.
///
/// Performs no retries; callers decide the retry policy.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    /// Creates a client for the relay at `base_url` (e.g. `http://host:8000`).
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the relay base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn upload_url(&self, name: &str) -> Result<String, RelayError> {
        let name = apkrelay_transfer::sanitize_name(name)
            .map_err(|e| RelayError::Rejected(e.to_string()))?;
        Ok(format!(
            "{}{UPLOAD_ROUTE}/{}",
            self.base_url,
            encode_segment(&name)
        ))
    }

    /// Handle of a payload already staged on this relay under `name`.
    pub fn handle_for(&self, name: &str) -> Result<RetrievalHandle, RelayError> {
        let name = apkrelay_transfer::sanitize_name(name)
            .map_err(|e| RelayError::Rejected(e.to_string()))?;
        Ok(RetrievalHandle::Url {
            url: format!("{}{FILES_ROUTE}/{}", self.base_url, encode_segment(&name)),
        })
    }

    /// Stages an in-memory payload and returns its retrieval handle.
    pub async fn stage(&self, name: &str, payload: Vec<u8>) -> Result<RetrievalHandle, RelayError> {
        self.stage_body(name, reqwest::Body::from(payload)).await
    }

    /// Stages a file by streaming it, without buffering it in memory.
    pub async fn stage_file(&self, name: &str, path: &Path) -> Result<RetrievalHandle, RelayError> {
        let file = tokio::fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.stage_body(name, body).await
    }

    async fn stage_body(
        &self,
        name: &str,
        body: reqwest::Body,
    ) -> Result<RetrievalHandle, RelayError> {
        let url = self.upload_url(name)?;
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        let status = resp.status();

        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE
        ) {
            let reason = error_message(resp).await;
            return Err(RelayError::Rejected(format!("{name}: {reason}")));
        }
        if !status.is_success() {
            let reason = error_message(resp).await;
            return Err(RelayError::Unavailable(format!(
                "stage {name}: HTTP {}: {reason}",
                status.as_u16()
            )));
        }

        let staged: StageResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Unavailable(format!("invalid stage response: {e}")))?;
        debug!(name, url = %staged.url, "payload staged");

        Ok(RetrievalHandle::Url { url: staged.url })
    }

    /// Downloads a staged payload into memory.
    pub async fn fetch(&self, handle: &RetrievalHandle) -> Result<Vec<u8>, RelayError> {
        let resp = self.get(handle).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Downloads a staged payload straight into `path`.
    ///
    /// Returns the number of bytes written. A partially written file is
    /// removed on failure.
    pub async fn fetch_to_file(
        &self,
        handle: &RetrievalHandle,
        path: &Path,
    ) -> Result<u64, RelayError> {
        let resp = self.get(handle).await?;
        let result = write_body(resp, path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(path).await;
        }
        result
    }

    async fn get(&self, handle: &RetrievalHandle) -> Result<reqwest::Response, RelayError> {
        let url = handle.url().ok_or_else(|| {
            RelayError::NotFound("handle does not reference the relay".into())
        })?;

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RelayError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(RelayError::Unavailable(format!(
                "fetch {url}: HTTP {}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }
}

async fn write_body(mut resp: reqwest::Response, path: &Path) -> Result<u64, RelayError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut total: u64 = 0;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(total)
}

/// Extracts the relay's `{"error": ...}` message, falling back to the raw body.
async fn error_message(resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body)
}
