//! Data types for the transfer flow.

use std::path::PathBuf;
use std::time::Duration;

use apkrelay_protocol::constants::{DEFAULT_CEILING, DEFAULT_CHUNK_SIZE};
use apkrelay_protocol::{FailureKind, OversizePolicy, RetrievalHandle, TransferState};
use apkrelay_transfer::TransferPlan;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upper bound for [`TransferConfig::max_retries`].
pub const MAX_RETRIES: u32 = 3;

/// Per-transfer settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Largest payload delivered as a single unit (inclusive).
    pub ceiling: u64,
    pub chunk_size: u64,
    pub oversize_policy: OversizePolicy,
    /// Extra attempts of the transferring step (clamped to [`MAX_RETRIES`]).
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Overall limit for one transfer; `None` waits indefinitely.
    pub deadline: Option<Duration>,
    /// Parent of the per-transfer scratch directories.
    pub temp_dir: PathBuf,
    /// Accepted extensions (empty = any).
    pub allowed_extensions: Vec<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_CEILING,
            chunk_size: DEFAULT_CHUNK_SIZE,
            oversize_policy: OversizePolicy::default(),
            max_retries: 1,
            retry_delay: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(30 * 60)),
            temp_dir: std::env::temp_dir().join("apkrelay"),
            allowed_extensions: vec!["apk".into()],
        }
    }
}

/// Event emitted while a transfer runs.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// The transfer entered a new state.
    State {
        transfer_id: String,
        state: TransferState,
    },
    /// Bytes acquired (while acquiring) or units delivered (while transferring).
    Progress {
        transfer_id: String,
        state: TransferState,
        done: u64,
        total: Option<u64>,
    },
    /// The transfer failed.
    Failed {
        transfer_id: String,
        kind: FailureKind,
        error: String,
    },
}

/// Outcome of one transfer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub transfer_id: String,
    /// Sanitized name, or the declared name when sanitization failed.
    pub name: String,
    /// Display name of the package (name without extension).
    pub package: String,
    /// `Completed` or `Failed`.
    pub state: TransferState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<TransferPlan>,
    /// Present for chunked and relay transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<RetrievalHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Attempts of the transferring step (0 if it was never reached).
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// State the transfer was in when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_during: Option<TransferState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Completed
    }
}
