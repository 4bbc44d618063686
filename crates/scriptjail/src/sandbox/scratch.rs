//! Per-invocation scratch area
//!
//! Each invocation gets a fresh directory on the host holding the generated
//! harness, the script's writable working directory and nsjail's log. The
//! directory is removed on [`ScratchArea::close`], or on drop as a fallback.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::harness::{HARNESS_FILE, Harness};
use crate::sandbox::SandboxError;

const WORK_DIR: &str = "work";
const LOG_FILE: &str = "nsjail.log";

/// Scratch directory owned by one invocation
#[derive(Debug)]
pub struct ScratchArea {
    id: String,
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchArea {
    /// Create a scratch area under `root`
    pub async fn create(root: &Path, id: &str) -> Result<Self, SandboxError> {
        let root_buf = root.to_path_buf();
        let prefix = format!("scriptjail-{id}-");

        let dir = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root_buf)?;
            let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(&root_buf)?;
            std::fs::create_dir(dir.path().join(WORK_DIR))?;
            Ok::<_, std::io::Error>(dir)
        })
        .await
        .map_err(|e| SandboxError::ScratchFailed {
            root: root.to_path_buf(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| SandboxError::ScratchFailed {
            root: root.to_path_buf(),
            source,
        })?;

        let path = dir.path().to_path_buf();
        debug!(id, path = %path.display(), "created scratch area");

        Ok(Self {
            id: id.to_string(),
            dir: Some(dir),
            path,
        })
    }

    /// Write the harness and open up permissions for the sandbox user
    pub async fn stage(&self, harness: &Harness) -> Result<(), SandboxError> {
        let harness_path = self.harness_path();
        tokio::fs::write(&harness_path, harness.source()).await?;
        tokio::fs::set_permissions(&harness_path, std::fs::Permissions::from_mode(0o644)).await?;

        // The script runs as an unprivileged uid that must be able to
        // traverse the scratch root and write to its working directory
        tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o755)).await?;
        tokio::fs::set_permissions(self.work_dir(), std::fs::Permissions::from_mode(0o777))
            .await?;

        debug!(id = %self.id, bytes = harness.source().len(), "staged harness");
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Root of the scratch area on the host
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn harness_path(&self) -> PathBuf {
        self.path.join(HARNESS_FILE)
    }

    /// Host side of the sandbox's working directory
    pub fn work_dir(&self) -> PathBuf {
        self.path.join(WORK_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Remove the scratch area
    pub async fn close(mut self) -> Result<(), SandboxError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let id = self.id.clone();

        tokio::task::spawn_blocking(move || remove(dir))
            .await
            .map_err(std::io::Error::other)??;

        debug!(id, "removed scratch area");
        Ok(())
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            warn!(
                id = %self.id,
                path = %self.path.display(),
                "scratch area dropped without close, removing synchronously"
            );
            if let Err(e) = remove(dir) {
                warn!(id = %self.id, error = %e, "failed to remove scratch area");
            }
        }
    }
}

/// Remove a scratch directory, recovering from permissions the script changed
///
/// The script may leave directories without owner write or search
/// permission, which makes their entries impossible to unlink.
fn remove(dir: TempDir) -> std::io::Result<()> {
    let path = dir.path().to_path_buf();
    match dir.close() {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "restoring permissions before retrying removal");
            restore_permissions(&path);
            match std::fs::remove_dir_all(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
    }
}

/// Grant the owner rwx on every directory below and including `dir`
fn restore_permissions(dir: &Path) {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            let mode = meta.permissions().mode() | 0o700;
            if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)) {
                debug!(path = %dir.display(), error = %e, "failed to restore permissions");
            }
        }
        _ => return,
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            restore_permissions(&entry.path());
        }
    }
}
