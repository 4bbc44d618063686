//! Script runner
//!
//! [`Runner`] is the entry point for executing scripts. It shares one
//! read-only [`Config`] between concurrent requests and bounds how many
//! sandboxes run at once.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use crate::runner::execute::{Invocation, classify};

mod execute;

use crate::{
    config::Config,
    sandbox::{SandboxError, missing_mounts, resolve_program},
    types::{ExecutionOutcome, ExecutionReport, ExecutionRequest, RequestError},
};

/// Errors reported by [`Runner::check`]
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("nsjail not found: {0}")]
    NsjailNotFound(#[source] SandboxError),

    #[error("nsjail at {} is not usable: {message}", path.display())]
    NsjailUnusable { path: PathBuf, message: String },

    #[error("interpreter not found: {0}")]
    InterpreterNotFound(#[source] SandboxError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// What [`Runner::check`] found on the host
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub nsjail: PathBuf,
    pub python: PathBuf,
    /// Required mount sources that do not exist
    pub missing_mounts: Vec<String>,
}

/// High-level runner for script execution
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    slots: Arc<Semaphore>,
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            config: Arc::new(config),
            slots,
        }
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Maximum number of sandboxes running at once
    pub fn capacity(&self) -> usize {
        self.config.max_concurrency
    }

    /// Number of sandboxes that could start right now
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Validate a request and execute it
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the request is rejected before anything
    /// runs. Once it is accepted every failure is reported as an outcome.
    pub async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionReport, RequestError> {
        request.validate(&self.config.limit_bounds)?;
        Ok(self.execute(request).await)
    }

    /// Execute a request that the caller has already validated
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionReport {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute a request, stopping early when `cancel` fires
    ///
    /// Cancellation while waiting for a free slot or while the child runs
    /// yields [`ExecutionOutcome::Cancelled`]. Dropping the returned future
    /// kills the child's process group and removes its scratch area.
    #[instrument(skip_all)]
    pub async fn execute_with_cancel(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let invocation = Invocation::new(self.config.clone(), request);

        let permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => permit,
            _ = cancel.cancelled() => {
                debug!(id = invocation.id(), "cancelled while waiting for a slot");
                return invocation.skipped(ExecutionOutcome::Cancelled);
            }
        };
        let Ok(_permit) = permit else {
            return invocation.skipped(ExecutionOutcome::LaunchError {
                message: "runner is shut down".to_string(),
            });
        };

        invocation.execute(cancel).await
    }

    /// Stop accepting work; queued and future requests get a launch error
    pub fn shutdown(&self) {
        self.slots.close();
    }

    /// Verify that nsjail starts and the interpreter resolves
    #[instrument(skip(self))]
    pub async fn check(&self) -> Result<CheckReport, CheckError> {
        let nsjail =
            resolve_program(&self.config.nsjail_binary()).map_err(CheckError::NsjailNotFound)?;
        probe_nsjail(&nsjail).await?;

        let python = resolve_program(&self.config.python_binary())
            .map_err(CheckError::InterpreterNotFound)?;

        let missing_mounts = missing_mounts(&self.config.mounts);

        debug!(nsjail = %nsjail.display(), python = %python.display(), "check passed");

        Ok(CheckReport {
            nsjail,
            python,
            missing_mounts,
        })
    }
}

/// Run `nsjail --help` and make sure it identifies itself
async fn probe_nsjail(nsjail: &Path) -> Result<(), CheckError> {
    let output = tokio::process::Command::new(nsjail)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| SandboxError::SpawnFailed {
            program: nsjail.to_path_buf(),
            source,
        })?;

    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if output.status.success() || text.contains("Usage") {
        return Ok(());
    }

    Err(CheckError::NsjailUnusable {
        path: nsjail.to_path_buf(),
        message: text
            .lines()
            .next()
            .map(String::from)
            .unwrap_or_else(|| format!("exited with {}", output.status)),
    })
}
