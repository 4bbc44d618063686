//! Execution of a single request
//!
//! An [`Invocation`] owns everything one request needs: its id, the
//! generated harness with its sentinels, the resolved sandbox config and,
//! while running, its scratch area. Every path ends in an
//! [`ExecutionReport`] and removes the scratch area.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::harness::{Harness, Sentinels};
use crate::protocol::parse_output;
use crate::sandbox::{
    CapturedOutput, Diagnostics, ExitClass, Launch, SandboxConfig, ScratchArea, Supervision,
    Termination, interpreter_command, resolve_program, supervise,
};
use crate::types::{
    ExecutionMethod, ExecutionOutcome, ExecutionReport, ExecutionRequest, LimitKind,
};

/// Outcome of one attempt to run the harness
#[derive(Debug)]
struct Attempt {
    outcome: ExecutionOutcome,
    truncated: bool,
    method: Option<ExecutionMethod>,
}

impl Attempt {
    fn not_started(message: impl ToString) -> Self {
        Self {
            outcome: ExecutionOutcome::LaunchError {
                message: message.to_string(),
            },
            truncated: false,
            method: None,
        }
    }
}

/// Per-request execution context
#[derive(Debug)]
pub struct Invocation {
    id: String,
    harness: Harness,
    sandbox: SandboxConfig,
    config: Arc<Config>,
}

impl Invocation {
    pub fn new(config: Arc<Config>, request: &ExecutionRequest) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let harness = Harness::generate(&request.script, Sentinels::generate());
        let sandbox = SandboxConfig::build(&config, &request.limits());

        Self {
            id,
            harness,
            sandbox,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Wall-clock bound on the child
    pub fn deadline(&self) -> Duration {
        self.sandbox.deadline(self.config.overhead())
    }

    /// Stage, run and tear down
    #[instrument(skip_all, fields(id = %self.id, time_limit = self.sandbox.time_limit, memory_limit = self.sandbox.memory_limit))]
    pub async fn execute(self, cancel: &CancellationToken) -> ExecutionReport {
        let start = Instant::now();

        let attempt = match ScratchArea::create(&self.config.scratch_dir(), &self.id).await {
            Ok(scratch) => {
                let attempt = match scratch.stage(&self.harness).await {
                    Ok(()) => self.run(&scratch, cancel).await,
                    Err(e) => Attempt::not_started(format!("failed to stage harness: {e}")),
                };
                if let Err(e) = scratch.close().await {
                    warn!(error = %e, "failed to remove scratch area");
                }
                attempt
            }
            Err(e) => Attempt::not_started(e),
        };

        let elapsed = start.elapsed();
        info!(
            outcome = attempt.outcome.kind(),
            method = ?attempt.method,
            truncated = attempt.truncated,
            ?elapsed,
            "execution finished"
        );

        self.report(attempt, elapsed)
    }

    /// Report for a request that never reached the sandbox
    pub fn skipped(self, outcome: ExecutionOutcome) -> ExecutionReport {
        self.report(
            Attempt {
                outcome,
                truncated: false,
                method: None,
            },
            Duration::ZERO,
        )
    }

    fn report(self, attempt: Attempt, elapsed: Duration) -> ExecutionReport {
        ExecutionReport {
            id: self.id,
            outcome: attempt.outcome,
            elapsed,
            clamped: self.sandbox.clamped,
            output_truncated: attempt.truncated,
            method: attempt.method,
        }
    }

    /// Run the staged harness under nsjail
    async fn run(&self, scratch: &ScratchArea, cancel: &CancellationToken) -> Attempt {
        let nsjail = match resolve_program(&self.config.nsjail_binary()) {
            Ok(path) => path,
            Err(e) => return Attempt::not_started(e),
        };
        let python = match resolve_program(&self.config.python_binary()) {
            Ok(path) => path,
            Err(e) => return Attempt::not_started(e),
        };

        let args = self.sandbox.command(
            &nsjail,
            self.config.nsjail_config.as_deref(),
            &python,
            scratch,
        );
        debug!(?args, "running nsjail");

        let launch = Launch {
            args: &args,
            cwd: None,
            env: None,
            deadline: self.deadline(),
            max_output: self.config.max_output_bytes,
        };
        let supervision = match supervise(&launch, cancel).await {
            Ok(supervision) => supervision,
            Err(e) => return Attempt::not_started(e),
        };

        let diagnostics = Diagnostics::load(scratch.log_path())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to read nsjail log");
                Diagnostics::default()
            });

        if let Some(ExitClass::SetupFailure(message)) = exit_class(&supervision, &diagnostics) {
            if self.config.fallback_to_direct {
                warn!(%message, "nsjail setup failed, running harness directly on the host");
                return self.run_direct(scratch, &python, cancel).await;
            }
            debug!(log = %diagnostics.summary(), "nsjail setup failed");
        }

        Attempt {
            outcome: classify(
                &supervision,
                &diagnostics,
                self.harness.sentinels(),
                &self.sandbox,
            ),
            truncated: supervision.output.truncated,
            method: Some(ExecutionMethod::Nsjail),
        }
    }

    /// Run the harness with the interpreter on the host, without isolation
    async fn run_direct(
        &self,
        scratch: &ScratchArea,
        python: &Path,
        cancel: &CancellationToken,
    ) -> Attempt {
        let harness = scratch.harness_path();
        let args = interpreter_command(python, &harness.to_string_lossy());
        let work_dir = scratch.work_dir();
        debug!(?args, "running harness directly");

        let launch = Launch {
            args: &args,
            cwd: Some(&work_dir),
            env: Some(&self.config.env),
            deadline: self.deadline(),
            max_output: self.config.max_output_bytes,
        };
        let supervision = match supervise(&launch, cancel).await {
            Ok(supervision) => supervision,
            Err(e) => return Attempt::not_started(e),
        };

        Attempt {
            outcome: classify(
                &supervision,
                &Diagnostics::default(),
                self.harness.sentinels(),
                &self.sandbox,
            ),
            truncated: supervision.output.truncated,
            method: Some(ExecutionMethod::Direct),
        }
    }
}

fn exit_class(supervision: &Supervision, diagnostics: &Diagnostics) -> Option<ExitClass> {
    match supervision.termination {
        Termination::Exited(status) => Some(diagnostics.classify(status.code(), status.signal())),
        Termination::DeadlineElapsed | Termination::Cancelled => None,
    }
}

/// Turn a finished supervision into an outcome
pub fn classify(
    supervision: &Supervision,
    diagnostics: &Diagnostics,
    sentinels: &Sentinels,
    sandbox: &SandboxConfig,
) -> ExecutionOutcome {
    let output = &supervision.output;

    let Some(class) = exit_class(supervision, diagnostics) else {
        return match supervision.termination {
            Termination::Cancelled => ExecutionOutcome::Cancelled,
            _ => ExecutionOutcome::TimeoutError {
                time_limit: sandbox.time_limit,
                stdout: user_stdout(output, sentinels),
            },
        };
    };

    let outcome = match class {
        ExitClass::Clean => parse_output(&output.bytes, sentinels, 0),
        ExitClass::Failed(code) => {
            interpreter_oom(parse_output(&output.bytes, sentinels, code), code)
        }
        ExitClass::TimeLimit => ExecutionOutcome::TimeoutError {
            time_limit: sandbox.time_limit,
            stdout: user_stdout(output, sentinels),
        },
        ExitClass::Limit(kind) => ExecutionOutcome::ResourceLimitExceeded {
            kind,
            message: Some(limit_message(kind, sandbox)),
            stdout: user_stdout(output, sentinels),
        },
        ExitClass::SetupFailure(message) => ExecutionOutcome::LaunchError {
            message: format!("nsjail failed to set up the sandbox: {message}"),
        },
    };

    output_overflow(outcome, output)
}

/// RLIMIT_AS surfaces as a bare `MemoryError` raised by the interpreter
///
/// Only a framed error with the argument-less message the interpreter uses
/// for failed allocations counts, and only when the trailer exited with 1.
fn interpreter_oom(outcome: ExecutionOutcome, exit_code: i32) -> ExecutionOutcome {
    match outcome {
        ExecutionOutcome::ScriptError {
            message,
            stdout,
            error_type: Some(kind),
            ..
        } if exit_code == 1 && kind == "MemoryError" && is_bare_memory_error(&message) => {
            ExecutionOutcome::ResourceLimitExceeded {
                kind: LimitKind::Memory,
                message: Some("MemoryError".to_string()),
                stdout,
            }
        }
        other => other,
    }
}

fn is_bare_memory_error(message: &str) -> bool {
    message.is_empty() || message == "MemoryError"
}

/// Framing lost to truncation is an output limit hit
fn output_overflow(outcome: ExecutionOutcome, output: &CapturedOutput) -> ExecutionOutcome {
    match outcome {
        ExecutionOutcome::ScriptError {
            error_type: None,
            stdout,
            ..
        } if output.truncated => ExecutionOutcome::ResourceLimitExceeded {
            kind: LimitKind::Output,
            message: Some(output_message(output)),
            stdout,
        },
        ExecutionOutcome::ProtocolError { raw, .. } if output.truncated => {
            ExecutionOutcome::ResourceLimitExceeded {
                kind: LimitKind::Output,
                message: Some(output_message(output)),
                stdout: raw,
            }
        }

        other => other,
    }
}

fn limit_message(kind: LimitKind, sandbox: &SandboxConfig) -> String {
    match kind {
        LimitKind::Memory => format!("memory limit of {} MB exceeded", sandbox.memory_limit),
        LimitKind::CpuTime => format!("CPU time limit of {} s exceeded", sandbox.time_limit),
        LimitKind::FileSize => format!("file size limit of {} MB exceeded", sandbox.max_file_size),
        LimitKind::Output => "output limit exceeded".to_string(),
    }
}

fn output_message(output: &CapturedOutput) -> String {
    format!(
        "output exceeded the capture limit ({} of {} bytes kept)",
        output.bytes.len(),
        output.total
    )
}

/// Output before any protocol block, for outcomes that never reach the parser
fn user_stdout(output: &CapturedOutput, sentinels: &Sentinels) -> String {
    let text = String::from_utf8_lossy(&output.bytes);
    let end = [&sentinels.result_open, &sentinels.error_open]
        .into_iter()
        .filter_map(|marker| text.find(marker.as_str()))
        .min()
        .unwrap_or(text.len());
    text[..end].to_string()
}
