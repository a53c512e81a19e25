//! Chunk codec, name sanitization and transfer strategy selection.
//!
//! Everything here is transport-agnostic: the relay and orchestrator
//! crates build on these pieces to move payloads that exceed a
//! per-message size ceiling.

mod chunked;
mod selector;
mod types;
mod validation;

pub use chunked::{
    ChunkReader, Checksum, calculate_file_checksum, checksum_bytes, discover_parts, reassemble,
    reassemble_files, split,
};
pub use selector::{StrategySelector, TransferPlan};
pub use types::Chunk;
pub use validation::{package_stem, sanitize_name, validate_extension};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("incomplete transfer: {0}")]
    IncompleteTransfer(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),
}
