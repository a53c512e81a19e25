//! Delivery destinations.
//!
//! `Destination` is the seam between the orchestrator and whatever the
//! recipient is (a chat, a device, a directory). Implementations receive
//! names that are already sanitized.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use apkrelay_protocol::ChunkTag;
use apkrelay_protocol::constants::PART_SUFFIX;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::OrchestratorError;

/// Future returned by every delivery call.
pub type Delivery<'a> = Pin<Box<dyn Future<Output = Result<(), OrchestratorError>> + Send + 'a>>;

/// A recipient of delivered payloads.
pub trait Destination: Send + Sync {
    /// Whether numbered parts can be delivered.
    fn supports_chunks(&self) -> bool;

    /// Delivers the whole payload at `path` under `name`.
    fn deliver_file<'a>(&'a self, name: &'a str, path: &'a Path) -> Delivery<'a>;

    /// Delivers one tagged part.
    fn deliver_chunk<'a>(&'a self, tag: &'a ChunkTag, data: &'a [u8]) -> Delivery<'a>;

    /// Delivers the human-readable summary of a finished transfer.
    fn deliver_summary<'a>(&'a self, name: &'a str, summary: &'a str) -> Delivery<'a>;
}

/// Suffix of the summary file written next to a delivered payload.
pub const SUMMARY_SUFFIX: &str = ".txt";

/// Delivers into a local output directory.
///
/// Whole payloads land as `<dir>/<name>`, parts as `<dir>/<name>.part<i>`,
/// and the summary as `<dir>/<name>.txt`.
#[derive(Debug, Clone)]
pub struct DirectoryDestination {
    dir: PathBuf,
    chunk_capable: bool,
}

impl DirectoryDestination {
    /// Creates the output directory if needed.
    pub async fn open(dir: impl Into<PathBuf>, chunk_capable: bool) -> Result<Self, OrchestratorError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OrchestratorError::Destination(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir, chunk_capable })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, file_name: &str, data: &[u8]) -> Result<(), OrchestratorError> {
        let path = self.dir.join(file_name);
        let result = async {
            let mut file = tokio::fs::File::create(&path).await?;
            file.write_all(data).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            discard(&path).await;
            return Err(OrchestratorError::Destination(format!(
                "{}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Removes `<name>.part<i>` files with `i >= total` left by an earlier
    /// delivery of the same name.
    async fn prune_parts(&self, name: &str, total: u32) -> Result<(), OrchestratorError> {
        let prefix = format!("{name}{PART_SUFFIX}");
        let io_err = |e: std::io::Error| {
            OrchestratorError::Destination(format!("{}: {e}", self.dir.display()))
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let file_name = entry.file_name();
            let Some(index) = file_name
                .to_str()
                .and_then(|f| f.strip_prefix(&prefix))
                .and_then(|i| i.parse::<u32>().ok())
            else {
                continue;
            };
            if index >= total {
                tokio::fs::remove_file(entry.path()).await.map_err(io_err)?;
                debug!(name, index, "stale part removed");
            }
        }
        Ok(())
    }
}

impl Destination for DirectoryDestination {
    fn supports_chunks(&self) -> bool {
        self.chunk_capable
    }

    fn deliver_file<'a>(&'a self, name: &'a str, path: &'a Path) -> Delivery<'a> {
        Box::pin(async move {
            let target = self.dir.join(name);
            match tokio::fs::copy(path, &target).await {
                Ok(bytes) => {
                    debug!(name, bytes, dir = %self.dir.display(), "payload delivered");
                    Ok(())
                }
                Err(e) => {
                    discard(&target).await;
                    Err(OrchestratorError::Destination(format!(
                        "{}: {e}",
                        target.display()
                    )))
                }
            }
        })
    }

    fn deliver_chunk<'a>(&'a self, tag: &'a ChunkTag, data: &'a [u8]) -> Delivery<'a> {
        Box::pin(async move {
            if !self.chunk_capable {
                return Err(OrchestratorError::Destination(
                    "destination does not accept parts".into(),
                ));
            }
            if tag.index == 0 {
                self.prune_parts(&tag.original_name, tag.total).await?;
            }
            let part = tag.part_name();
            self.write(&part, data).await?;
            debug!(part = %part, index = tag.index, total = tag.total, "part delivered");
            Ok(())
        })
    }

    fn deliver_summary<'a>(&'a self, name: &'a str, summary: &'a str) -> Delivery<'a> {
        Box::pin(async move {
            self.write(&format!("{name}{SUMMARY_SUFFIX}"), summary.as_bytes())
                .await
        })
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove partial delivery");
    }
}
