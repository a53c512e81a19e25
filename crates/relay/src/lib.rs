//! Staging relay for payloads that exceed the direct-transfer ceiling.
//!
//! The [`client`] stages whole payloads with `POST /upload/{name}` and
//! fetches them back from the returned URL. The [`server`] is the
//! matching axum service, backed by a [`store::FileStore`] directory.

pub mod client;
pub mod error;
pub mod server;
pub mod store;

pub use client::RelayClient;
pub use error::RelayError;
pub use server::{RelayServer, ServerConfig};
pub use store::FileStore;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters escaped in a URL path segment; unreserved ones stay readable.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes a sanitized name for use as a single path segment.
pub(crate) fn encode_segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT).to_string()
}
