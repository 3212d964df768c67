use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::api::ChatApi;
use crate::error::Result;
use crate::message::Attachment;

/// Per-session directory holding downloaded attachments.
///
/// Removed by [`ScratchDir::cleanup`] on shutdown, and by `TempDir`'s drop on
/// every other exit path.
pub struct ScratchDir {
    dir: Mutex<Option<TempDir>>,
    seen: Mutex<HashSet<String>>,
    counter: AtomicUsize,
}

impl ScratchDir {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("tencord-").tempdir()?;
        debug!("Scratch directory at {}", dir.path().display());
        Ok(Self::with_dir(dir))
    }

    pub fn with_dir(dir: TempDir) -> Self {
        Self {
            dir: Mutex::new(Some(dir)),
            seen: Mutex::new(HashSet::new()),
            counter: AtomicUsize::new(0),
        }
    }

    /// `None` once cleaned up.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock_dir().as_ref().map(|d| d.path().to_path_buf())
    }

    /// Download an attachment once. Returns the local path on first sight of
    /// its URL and `None` for URLs already fetched.
    pub async fn fetch(&self, api: &dyn ChatApi, attachment: &Attachment) -> Result<Option<PathBuf>> {
        if self.lock_seen().contains(&attachment.url) {
            return Ok(None);
        }
        let Some(dir) = self.path() else {
            return Ok(None);
        };

        let bytes = api.download(&attachment.url).await?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let target = dir.join(format!("{n}-{}", safe_file_name(&attachment.filename)));
        tokio::fs::write(&target, bytes).await?;

        self.lock_seen().insert(attachment.url.clone());
        Ok(Some(target))
    }

    /// Delete the directory and everything in it. Idempotent.
    pub fn cleanup(&self) -> Result<()> {
        if let Some(dir) = self.lock_dir().take() {
            let path = dir.path().to_path_buf();
            dir.close()?;
            info!("Removed scratch directory {}", path.display());
        }
        Ok(())
    }

    fn lock_dir(&self) -> std::sync::MutexGuard<'_, Option<TempDir>> {
        self.dir.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_seen(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Last path component only, so a crafted filename cannot escape the directory.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}
