pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{ChunkTag, ErrorResponse, RetrievalHandle, StageResponse, part_name};
pub use types::{FailureKind, OversizePolicy, TransferState, TransferStrategy};
