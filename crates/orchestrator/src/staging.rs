//! Per-transfer temporary storage.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A scratch directory owned by exactly one transfer.
///
/// Lives at `<root>/<transfer id>`. Call [`release`](Self::release) to
/// remove it; dropping an unreleased storage removes it synchronously.
#[derive(Debug)]
pub struct TempStorage {
    dir: PathBuf,
    released: bool,
}

impl TempStorage {
    /// Creates `<root>/<transfer_id>`.
    pub async fn create(root: &Path, transfer_id: &str) -> std::io::Result<Self> {
        let dir = root.join(transfer_id);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "temporary storage created");
        Ok(Self {
            dir,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Removes the directory and everything in it.
    pub async fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "temporary storage released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for TempStorage {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(dir = %self.dir.display(), error = %e, "failed to remove temporary storage");
        }
    }
}
