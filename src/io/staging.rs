//! Recording staging and temp-file cleanup
//!
//! The recorder writes into a cache directory the OS may purge at any time.
//! Before the asynchronous upload starts, the file is copied into an
//! app-private staging directory. Staging is best-effort: callers fall back
//! to the original path when the copy fails.

use crate::domain::error::{StageError, UploadError};
use crate::domain::types::AttemptId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct FileStager {
    dir: PathBuf,
}

impl FileStager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic staging location for one submission attempt
    pub fn staged_path(&self, session_tag: &str, attempt: AttemptId) -> PathBuf {
        self.dir.join(format!("liveness-{session_tag}-{attempt}.mp4"))
    }

    /// Copy `from` to `to`, creating the staging directory if needed
    pub async fn stage(&self, from: &Path, to: &Path) -> Result<PathBuf, StageError> {
        if !tokio::fs::try_exists(from).await.unwrap_or(false) {
            return Err(StageError::MissingSource(from.display().to_string()));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(from, to).await?;
        info!(from = %from.display(), to = %to.display(), bytes = %bytes, "recording_staged");
        Ok(to.to_path_buf())
    }

    /// Stage, or fall back to the original path. Returns the path to upload
    /// and whether a staged copy exists that must be cleaned up.
    pub async fn stage_or_original(&self, from: &Path, to: &Path) -> (PathBuf, bool) {
        match self.stage(from, to).await {
            Ok(path) => (path, true),
            Err(e) => {
                warn!(from = %from.display(), error = %e, "staging_failed_using_original");
                // A partial copy may have been left behind
                delete_file(to).await;
                (from.to_path_buf(), false)
            }
        }
    }
}

/// Best-effort delete. Failures are logged, never escalated.
pub async fn delete_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "temp_file_deleted"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "temp_file_delete_failed"),
    }
}

/// Normalise a path to an absolute `file://` URL
///
/// Accepts plain relative/absolute paths and already scheme-qualified
/// `file://` references.
pub fn normalize_file_uri(path: &Path) -> Result<Url, UploadError> {
    let raw = path.to_string_lossy();
    if raw.starts_with("file://") {
        return Url::parse(&raw).map_err(|e| UploadError::InvalidFileRef(format!("{raw}: {e}")));
    }
    let absolute = std::path::absolute(path)
        .map_err(|e| UploadError::InvalidFileRef(format!("{raw}: {e}")))?;
    Url::from_file_path(&absolute)
        .map_err(|_| UploadError::InvalidFileRef(absolute.display().to_string()))
}
