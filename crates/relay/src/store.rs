//! File-backed storage behind the relay server.
//!
//! Uploads are streamed into `<root>/.incoming/<uuid>` and renamed into
//! `<root>/<name>` only once complete, so readers never observe a
//! half-written payload.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Directory (under the root) holding uploads in progress.
const INCOMING_DIR: &str = ".incoming";

/// Staged payload storage.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    incoming: PathBuf,
    allowed_extensions: Vec<String>,
    max_size: u64,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// `max_size` of 0 means unlimited. An empty `allowed_extensions`
    /// accepts every name.
    pub async fn open(
        root: PathBuf,
        allowed_extensions: Vec<String>,
        max_size: u64,
    ) -> Result<Self, RelayError> {
        let incoming = root.join(INCOMING_DIR);
        tokio::fs::create_dir_all(&incoming).await?;
        Ok(Self {
            root,
            incoming,
            allowed_extensions,
            max_size,
        })
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitizes `name` and applies the extension allow-list.
    pub fn check_name(&self, name: &str) -> Result<String, RelayError> {
        let name = apkrelay_transfer::sanitize_name(name)
            .map_err(|e| RelayError::Rejected(e.to_string()))?;
        apkrelay_transfer::validate_extension(&name, &self.allowed_extensions)
            .map_err(|e| RelayError::Rejected(e.to_string()))?;
        Ok(name)
    }

    /// Streams `body` into the store under `name`, replacing any previous
    /// payload with that name. Returns the stored size.
    pub async fn put<S, B, E>(&self, name: &str, body: S) -> Result<u64, RelayError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let name = self.check_name(name)?;
        let temp_path = self.incoming.join(uuid::Uuid::new_v4().to_string());

        let size = match self.write_incoming(&temp_path, body).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&temp_path).await {
                    warn!(path = %temp_path.display(), error = %rm, "failed to remove partial upload");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&temp_path, self.root.join(&name)).await?;
        debug!(name = %name, size, "upload committed");
        Ok(size)
    }

    async fn write_incoming<S, B, E>(&self, temp_path: &Path, mut body: S) -> Result<u64, RelayError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut file = tokio::fs::File::create(temp_path).await?;
        let mut size: u64 = 0;

        while let Some(frame) = body.next().await {
            let frame = frame.map_err(|e| RelayError::Unavailable(format!("upload aborted: {e}")))?;
            let data = frame.as_ref();
            size += data.len() as u64;
            if self.max_size > 0 && size > self.max_size {
                return Err(RelayError::TooLarge {
                    limit: self.max_size,
                });
            }
            file.write_all(data).await?;
        }
        file.flush().await?;
        Ok(size)
    }

    /// Opens a stored payload for reading. Returns the file and its size.
    pub async fn open_file(&self, name: &str) -> Result<(tokio::fs::File, u64), RelayError> {
        let name = apkrelay_transfer::sanitize_name(name)
            .map_err(|_| RelayError::NotFound(name.to_string()))?;
        let path = self.root.join(&name);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let meta = file.metadata().await?;
                if !meta.is_file() {
                    return Err(RelayError::NotFound(name));
                }
                Ok((file, meta.len()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RelayError::NotFound(name)),
            Err(e) => Err(e.into()),
        }
    }
}
