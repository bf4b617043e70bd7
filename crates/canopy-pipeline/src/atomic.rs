//! Write-then-rename file publication.
//!
//! Readers only ever observe a missing file or a complete one: content goes
//! to a hidden temp sibling, is flushed to disk, and is then renamed over
//! the target.

use canopy_core::error::{CanopyError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a publication ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// Every rename attempt failed; the complete content is left at `temp`
    TempKept { temp: PathBuf, reason: String },
}

impl RenameOutcome {
    pub fn is_renamed(&self) -> bool {
        matches!(self, RenameOutcome::Renamed)
    }
}

/// Atomic file publisher with bounded rename retries
#[derive(Debug, Clone, Copy)]
pub struct AtomicWriter {
    rename_attempts: u32,
    rename_delay: Duration,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self { rename_attempts: 6, rename_delay: Duration::from_millis(500) }
    }
}

impl AtomicWriter {
    pub fn new(rename_attempts: u32, rename_delay: Duration) -> Self {
        Self { rename_attempts: rename_attempts.max(1), rename_delay }
    }

    /// Temp sibling used while `target` is being written
    pub fn temp_path(target: &Path) -> PathBuf {
        let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        target.with_file_name(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4()))
    }

    /// Publish `target` with content produced by `write`, which receives the
    /// temp path to write to.
    ///
    /// A failing `write` is an error and leaves nothing behind. A failing
    /// rename is not: the outcome carries the kept temp file instead.
    pub async fn publish<F>(&self, target: &Path, write: F) -> Result<RenameOutcome>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let temp = Self::temp_path(target);
        let written = write(&temp);
        self.finish(written, temp, target).await
    }

    /// Publish `target` as a copy of the already published `source`
    pub async fn promote_copy(&self, source: &Path, target: &Path) -> Result<RenameOutcome> {
        let temp = Self::temp_path(target);
        let copied = tokio::fs::copy(source, &temp).await.map(|_| ()).map_err(CanopyError::from);
        self.finish(copied, temp, target).await
    }

    async fn finish(&self, written: Result<()>, temp: PathBuf, target: &Path) -> Result<RenameOutcome> {
        let synced = match written {
            Ok(()) => sync_file(&temp).await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CanopyError::Publish { path: target.to_path_buf(), reason: e.to_string() });
        }

        Ok(self.rename_into_place(&temp, target).await)
    }

    async fn rename_into_place(&self, temp: &Path, target: &Path) -> RenameOutcome {
        let mut last_error = String::new();

        for attempt in 1..=self.rename_attempts {
            match tokio::fs::rename(temp, target).await {
                Ok(()) => {
                    tracing::debug!(path = %target.display(), attempt, "Published file");
                    return RenameOutcome::Renamed;
                }
                Err(e) => {
                    tracing::warn!(path = %target.display(), attempt, error = %e, "Rename failed");
                    last_error = e.to_string();
                    if attempt < self.rename_attempts {
                        tokio::time::sleep(self.rename_delay).await;
                    }
                }
            }
        }

        tracing::warn!(
            path = %target.display(),
            temp = %temp.display(),
            "Giving up on rename, temp file kept"
        );
        RenameOutcome::TempKept { temp: temp.to_path_buf(), reason: last_error }
    }
}

async fn sync_file(path: &Path) -> Result<()> {
    tokio::fs::File::open(path).await?.sync_all().await?;
    Ok(())
}
