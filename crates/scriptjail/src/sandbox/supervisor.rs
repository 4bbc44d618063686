//! Child process supervision
//!
//! Spawns a program in its own process group with stdout and stderr merged
//! into one pipe, drains that pipe into a bounded buffer, and enforces a
//! wall-clock deadline and cooperative cancellation by killing the whole
//! group. The group is also killed when the supervision future is dropped.

use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::sandbox::SandboxError;

/// How long to keep reading after the child exits, for output still held
/// by stray descendants or sitting in the pipe
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on waiting for a killed child to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8192;

/// What to run and how to bound it
#[derive(Debug, Clone)]
pub struct Launch<'a> {
    /// Program followed by its arguments
    pub args: &'a [String],
    pub cwd: Option<&'a Path>,
    /// Replaces the inherited environment when set (`KEY=VALUE` entries)
    pub env: Option<&'a [String]>,
    pub deadline: Duration,
    /// Bytes of combined output to keep
    pub max_output: usize,
}

/// Combined stdout/stderr of the child, capped at a byte ceiling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub bytes: Vec<u8>,
    /// Bytes read from the pipe, including discarded ones
    pub total: usize,
    pub truncated: bool,
    limit: usize,
}

impl CapturedOutput {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            total: 0,
            truncated: false,
            limit,
        }
    }

    /// Append a chunk, discarding whatever exceeds the ceiling
    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes
            .extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Why supervision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child exited on its own
    Exited(ExitStatus),
    /// The wall-clock deadline passed and the group was killed
    DeadlineElapsed,
    /// The cancellation token fired and the group was killed
    Cancelled,
}

/// Result of supervising one child
#[derive(Debug, Clone)]
pub struct Supervision {
    pub termination: Termination,
    pub output: CapturedOutput,
    pub elapsed: Duration,
}

/// Kills the child's process group on drop
struct GroupGuard {
    pgid: Option<Pid>,
}

impl GroupGuard {
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => debug!(%pgid, "killed process group"),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(%pgid, error = %e, "failed to kill process group"),
            }
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `launch` to completion, deadline or cancellation
#[instrument(skip_all, fields(program = launch.args.first().map(String::as_str).unwrap_or("")))]
pub async fn supervise(
    launch: &Launch<'_>,
    cancel: &CancellationToken,
) -> Result<Supervision, SandboxError> {
    let program = launch
        .args
        .first()
        .ok_or_else(|| SandboxError::InvalidPath("empty command arguments".to_string()))?;

    let (reader, writer) = std::io::pipe()?;
    let (mut child, pid) = {
        let stderr = writer.try_clone()?;
        let mut command = Command::new(program);
        command
            .args(&launch.args[1..])
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(true);
        if let Some(cwd) = launch.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = launch.env {
            command.env_clear();
            for entry in env {
                if let Some((key, value)) = entry.split_once('=') {
                    command.env(key, value);
                }
            }
        }

        let child = command.spawn().map_err(|source| SandboxError::SpawnFailed {
            program: program.into(),
            source,
        })?;
        let pid = child.id();
        // `command` drops here, closing our copies of the write end
        (child, pid)
    };

    let mut guard = GroupGuard {
        pgid: pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw),
    };
    let mut reader = pipe::Receiver::from_owned_fd(reader.into())?;

    debug!(pid, deadline = ?launch.deadline, "spawned child");

    let start = Instant::now();
    let mut output = CapturedOutput::new(launch.max_output);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut status: Option<ExitStatus> = None;
    let mut eof = false;
    let mut grace: Option<Pin<Box<Sleep>>> = None;

    let deadline = tokio::time::sleep(launch.deadline);
    tokio::pin!(deadline);

    let termination = loop {
        if eof && let Some(status) = status {
            break Termination::Exited(status);
        }

        tokio::select! {
            read = reader.read(&mut buf), if !eof => match read {
                Ok(0) => eof = true,
                Ok(n) => output.push(&buf[..n]),
                Err(e) => {
                    warn!(error = %e, "failed to read child output");
                    eof = true;
                }
            },
            waited = child.wait(), if status.is_none() => {
                status = Some(waited?);
                grace = Some(Box::pin(tokio::time::sleep(DRAIN_GRACE)));
            },
            _ = wait_opt(&mut grace) => {
                debug!("output still open after exit, giving up on drain");
                eof = true;
            },
            _ = &mut deadline, if status.is_none() => break Termination::DeadlineElapsed,
            _ = cancel.cancelled() => break Termination::Cancelled,
        }
    };

    if !matches!(termination, Termination::Exited(_)) {
        debug!(?termination, "killing child");
        guard.kill();
        if status.is_none() {
            reap(&mut child).await;
        }
        drain_remaining(&mut reader, &mut output, eof).await;
    }
    drop(guard);

    let elapsed = start.elapsed();
    debug!(
        ?termination,
        bytes = output.total,
        truncated = output.truncated,
        ?elapsed,
        "supervision finished"
    );

    Ok(Supervision {
        termination,
        output,
        elapsed,
    })
}

async fn wait_opt(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn reap(child: &mut Child) {
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "reaped killed child"),
        Ok(Err(e)) => warn!(error = %e, "failed to reap killed child"),
        Err(_) => warn!("killed child did not exit in time"),
    }
}

/// Collect output written before the kill landed
async fn drain_remaining(reader: &mut pipe::Receiver, output: &mut CapturedOutput, eof: bool) {
    if eof {
        return;
    }
    let mut buf = vec![0u8; READ_CHUNK];
    let drain = async {
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => output.push(&buf[..n]),
            }
        }
    };
    let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;
}
