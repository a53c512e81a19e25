use std::fmt;

use serde::{Deserialize, Serialize};

/// How a single payload is moved to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    /// Payload fits under the ceiling and is delivered unchanged.
    Direct,
    /// Payload is split into numbered parts for manual reassembly.
    Chunked,
    /// Payload is staged on the relay and a single URL is returned.
    Relay,
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Chunked => "chunked",
            Self::Relay => "relay",
        })
    }
}

/// Preferred strategy for payloads above the ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    #[default]
    Chunked,
    Relay,
}

impl OversizePolicy {
    /// The strategy this preference maps to.
    pub fn strategy(self) -> TransferStrategy {
        match self {
            Self::Chunked => TransferStrategy::Chunked,
            Self::Relay => TransferStrategy::Relay,
        }
    }
}

/// Lifecycle state of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Acquiring,
    Planning,
    Transferring,
    Finalizing,
    Completed,
    Failed,
}

impl TransferState {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acquiring => "acquiring",
            Self::Planning => "planning",
            Self::Transferring => "transferring",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Error kind attached to a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceUnavailable,
    RelayUnavailable,
    RelayRejected,
    NotFound,
    IncompleteTransfer,
    Storage,
    InvalidName,
    Destination,
    Cancelled,
    DeadlineExceeded,
}

impl FailureKind {
    /// Kinds worth another attempt of the transferring step.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RelayUnavailable | Self::Destination | Self::Storage
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SourceUnavailable => "source unavailable",
            Self::RelayUnavailable => "relay unavailable",
            Self::RelayRejected => "relay rejected",
            Self::NotFound => "not found",
            Self::IncompleteTransfer => "incomplete transfer",
            Self::Storage => "storage error",
            Self::InvalidName => "invalid name",
            Self::Destination => "destination error",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline exceeded",
        })
    }
}
