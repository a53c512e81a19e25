use serde::{Deserialize, Serialize};

use crate::constants::PART_SUFFIX;

// ---------------------------------------------------------------------------
// Relay HTTP bodies
// ---------------------------------------------------------------------------

/// Successful `POST /upload/{name}` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResponse {
    pub url: String,
}

/// Error body returned by the relay on 4xx/5xx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Transfer results
// ---------------------------------------------------------------------------

/// Locator sufficient to reconstruct a delivered payload.
///
/// Serialized untagged: a relay handle is `{"url": ...}`, a chunked
/// handle is `{"name": ..., "parts": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrievalHandle {
    Url { url: String },
    Parts { name: String, parts: Vec<String> },
}

impl RetrievalHandle {
    /// Returns the relay URL, if this handle references the relay.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url { url } => Some(url),
            Self::Parts { .. } => None,
        }
    }

    /// Builds a chunked handle for `total` parts of `name`.
    pub fn parts(name: &str, total: u32) -> Self {
        Self::Parts {
            name: name.to_string(),
            parts: (0..total).map(|i| part_name(name, i)).collect(),
        }
    }
}

/// Tag attached to every part of a chunked delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkTag {
    pub original_name: String,
    pub index: u32,
    pub total: u32,
    pub size: u64,
    /// SHA-256 hex of the part (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl ChunkTag {
    /// File name the recipient sees for this part.
    pub fn part_name(&self) -> String {
        part_name(&self.original_name, self.index)
    }

    /// Returns `true` for the highest index.
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// `{original}.part{index}`, zero-based.
pub fn part_name(original: &str, index: u32) -> String {
    format!("{original}{PART_SUFFIX}{index}")
}
