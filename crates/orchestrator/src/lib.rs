//! Transfer orchestration for large payloads.
//!
//! This crate holds the **business logic** that moves one payload from an
//! inbound source to a destination. It has no UI: callers supply an
//! [`InboundSource`], a [`Destination`] and, optionally, a relay client.
//!
//! # Pipeline
//!
//! 1. **Acquiring**: stream the payload into per-transfer temporary storage
//! 2. **Planning**: pick direct, chunked or relay transfer by size
//! 3. **Transferring**: deliver the file, its parts, or stage it on the relay
//! 4. **Finalizing**: deliver a summary and release temporary storage

pub mod destination;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod staging;
pub mod types;

// Re-export primary types for convenience.
pub use destination::{Delivery, Destination, DirectoryDestination};
pub use error::OrchestratorError;
pub use orchestrator::{TransferContext, TransferOrchestrator};
pub use source::{FileSource, HttpSource, InboundPayload, InboundSource, PayloadReader};
pub use staging::TempStorage;
pub use types::{MAX_RETRIES, TransferConfig, TransferEvent, TransferReport};
