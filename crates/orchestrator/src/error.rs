//! Orchestrator error types.

use apkrelay_protocol::{FailureKind, TransferStrategy};
use apkrelay_relay::RelayError;
use apkrelay_transfer::TransferError;

/// Errors produced while driving a transfer.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("source unavailable: {0}")]
    Source(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("destination error: {0}")]
    Destination(String),

    #[error("{0} transfer is not available")]
    StrategyUnavailable(TransferStrategy),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl OrchestratorError {
    /// Classifies the error for the transfer report.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Source(_) => FailureKind::SourceUnavailable,
            Self::Storage(_) | Self::Io(_) => FailureKind::Storage,
            Self::Destination(_) => FailureKind::Destination,
            Self::StrategyUnavailable(TransferStrategy::Relay) => FailureKind::RelayUnavailable,
            Self::StrategyUnavailable(_) => FailureKind::Destination,
            Self::Relay(e) => match e {
                RelayError::Unavailable(_) => FailureKind::RelayUnavailable,
                RelayError::Rejected(_) | RelayError::TooLarge { .. } => FailureKind::RelayRejected,
                RelayError::NotFound(_) => FailureKind::NotFound,
                RelayError::Io(_) => FailureKind::Storage,
            },
            Self::Transfer(e) => match e {
                TransferError::InvalidName(_) => FailureKind::InvalidName,
                TransferError::Io(_) => FailureKind::Storage,
                TransferError::ChecksumMismatch
                | TransferError::IncompleteTransfer(_)
                | TransferError::InvalidChunkSize(_) => FailureKind::IncompleteTransfer,
            },
            Self::Cancelled => FailureKind::Cancelled,
            Self::DeadlineExceeded => FailureKind::DeadlineExceeded,
        }
    }

    /// Whether another attempt of the transferring step may succeed.
    ///
    /// A missing strategy stays missing, so it is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::StrategyUnavailable(_)) && self.kind().is_transient()
    }
}
