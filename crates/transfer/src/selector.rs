use apkrelay_protocol::{OversizePolicy, TransferStrategy};
use serde::Serialize;

/// Decision record for one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub strategy: TransferStrategy,
    pub payload_size: u64,
    pub ceiling: u64,
}

impl TransferPlan {
    /// Number of parts a chunked plan produces (0 for other strategies).
    pub fn chunk_count(&self, chunk_size: u64) -> u64 {
        match self.strategy {
            TransferStrategy::Chunked if chunk_size > 0 => self.payload_size.div_ceil(chunk_size),
            _ => 0,
        }
    }
}

/// Picks direct, chunked or relay transfer for a payload size.
///
/// The oversize preference comes from configuration; availability flags
/// describe what the current destination and deployment can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySelector {
    prefer: OversizePolicy,
    chunk_capable: bool,
    relay_available: bool,
}

impl StrategySelector {
    /// Creates a selector with both oversize strategies available.
    pub fn new(prefer: OversizePolicy) -> Self {
        Self {
            prefer,
            chunk_capable: true,
            relay_available: true,
        }
    }

    /// Whether the destination accepts numbered parts.
    pub fn with_chunk_capable(mut self, capable: bool) -> Self {
        self.chunk_capable = capable;
        self
    }

    /// Whether a relay client is configured.
    pub fn with_relay_available(mut self, available: bool) -> Self {
        self.relay_available = available;
        self
    }

    /// Decides how to move `payload_size` bytes under `ceiling`.
    ///
    /// The ceiling is inclusive: `payload_size == ceiling` is direct.
    pub fn decide(&self, payload_size: u64, ceiling: u64) -> TransferPlan {
        let strategy = if payload_size <= ceiling {
            TransferStrategy::Direct
        } else {
            self.oversize_strategy()
        };
        TransferPlan {
            strategy,
            payload_size,
            ceiling,
        }
    }

    fn oversize_strategy(&self) -> TransferStrategy {
        let available = |s: TransferStrategy| match s {
            TransferStrategy::Chunked => self.chunk_capable,
            TransferStrategy::Relay => self.relay_available,
            TransferStrategy::Direct => false,
        };
        let preferred = self.prefer.strategy();
        let fallback = match preferred {
            TransferStrategy::Chunked => TransferStrategy::Relay,
            _ => TransferStrategy::Chunked,
        };

        if available(preferred) || !available(fallback) {
            preferred
        } else {
            fallback
        }
    }
}
