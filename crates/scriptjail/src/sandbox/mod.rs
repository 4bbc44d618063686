//! nsjail wrapper
//!
//! This module provides a Rust interface to nsjail: building the argument
//! vector for one invocation, staging the per-invocation scratch area,
//! supervising the child process and reading nsjail's log for diagnostics.
//!
//! References for nsjail's CLI arguments:
//! - https://github.com/google/nsjail
//! - `nsjail --help`

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::sandbox::config::{SandboxConfig, interpreter_command};
pub use crate::sandbox::diagnostics::{Diagnostics, ExitClass, LogLevel, LogLine};
pub use crate::sandbox::scratch::ScratchArea;
pub use crate::sandbox::supervisor::{CapturedOutput, Launch, Supervision, Termination, supervise};
use crate::types::MountConfig;

mod config;
mod diagnostics;
mod scratch;
mod supervisor;

/// Mount point of the scratch area inside the sandbox
pub const SANDBOX_ROOT: &str = "/sandbox";

/// Working directory of the script inside the sandbox
pub const SANDBOX_WORK_DIR: &str = "/sandbox/work";

/// Errors that occur while staging or supervising a sandboxed process
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn {}: {source}", program.display())]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create scratch area under {}: {source}", root.display())]
    ScratchFailed {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{0}' not found in PATH")]
    BinaryNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Sources of required mounts that do not exist on the host
///
/// Optional mounts are skipped; [`SandboxConfig::command`] leaves them out
/// when their source is missing.
pub fn missing_mounts(mounts: &[MountConfig]) -> Vec<String> {
    mounts
        .iter()
        .filter(|m| !m.optional && !Path::new(&m.source).exists())
        .map(|m| m.source.clone())
        .collect()
}

/// Resolve a program to an absolute path using the host's PATH.
///
/// nsjail uses `execve`, which does not search PATH, so the interpreter must
/// be given as an absolute path. Programs that already contain a `/` are left
/// unchanged.
pub fn resolve_program(program: &Path) -> Result<PathBuf, SandboxError> {
    let name = program.to_string_lossy();
    if name.contains('/') {
        return Ok(program.to_path_buf());
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(program);
        if candidate.is_file() {
            // Canonicalize to resolve symlinks (e.g., /usr/bin/python3 -> /usr/bin/python3.12).
            // This ensures the resolved path is directly accessible inside the sandbox
            // without relying on symlink resolution across bind-mount boundaries.
            return Ok(std::fs::canonicalize(&candidate).unwrap_or(candidate));
        }
    }

    Err(SandboxError::BinaryNotFound(name.into_owned()))
}
