//! Error types for the relay client and server.

/// Errors produced by the staging relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    #[error("relay rejected payload: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}
