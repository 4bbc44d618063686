//! Sandbox configuration for one invocation
//!
//! Maps requested limits onto nsjail's flags. Building a [`SandboxConfig`]
//! is pure; only [`SandboxConfig::command`] looks at the filesystem,
//! to drop optional mounts whose source is missing.

use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::harness::HARNESS_FILE;
use crate::sandbox::{SANDBOX_ROOT, SANDBOX_WORK_DIR, ScratchArea};
use crate::types::{ClampedLimit, LimitClamp, MountConfig, ResourceLimits};

/// Unprivileged uid/gid the script runs as inside the sandbox
const NOBODY: u32 = 65534;

const SANDBOX_HOSTNAME: &str = "scriptjail";

/// Seconds of CPU time allowed beyond the wall-clock limit
///
/// nsjail sets RLIMIT_CPU with soft == hard, so the kernel SIGKILLs the child
/// the moment it is reached. A single-threaded busy loop must hit the
/// wall-clock limit first to be reported as a timeout.
const CPU_LIMIT_SLACK: u64 = 2;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Resolved isolation parameters for a single invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Seconds
    pub time_limit: u64,
    /// Megabytes
    pub memory_limit: u64,
    pub max_processes: u32,
    pub max_open_files: u32,
    /// Megabytes
    pub max_file_size: u64,
    pub cgroup: bool,
    /// Read-only view of the interpreter and its runtime
    pub mounts: Vec<MountConfig>,
    /// Working directory inside the sandbox
    pub working_dir: String,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    /// Whether the sandbox shares the host network namespace
    pub network: bool,
    /// Requested limits that were lowered to the host ceiling
    pub clamped: Vec<LimitClamp>,
}

impl SandboxConfig {
    /// Resolve `overrides` against the configured defaults and host ceiling
    pub fn build(config: &Config, overrides: &ResourceLimits) -> Self {
        let limits = config.effective_limits(Some(overrides));
        let mut clamped = Vec::new();

        let time_limit = clamp(
            ClampedLimit::TimeLimit,
            limits
                .time_limit
                .unwrap_or(ResourceLimits::DEFAULT_TIME_LIMIT),
            config.host_ceiling.max_time_limit,
            &mut clamped,
        );
        let memory_limit = clamp(
            ClampedLimit::MemoryLimit,
            limits
                .memory_limit
                .unwrap_or(ResourceLimits::DEFAULT_MEMORY_LIMIT),
            config.host_ceiling.max_memory_limit,
            &mut clamped,
        );

        Self {
            time_limit,
            memory_limit,
            max_processes: config.max_processes,
            max_open_files: config.max_open_files,
            max_file_size: config.max_file_size,
            cgroup: config.cgroup,
            mounts: config.mounts.clone(),
            working_dir: SANDBOX_WORK_DIR.to_string(),
            env: config.env.clone(),
            network: false,
            clamped,
        }
    }

    /// Hard wall-clock bound enforced by the supervisor
    pub fn deadline(&self, overhead: Duration) -> Duration {
        Duration::from_secs(self.time_limit) + overhead
    }

    /// CPU seconds granted before the kernel kills the child
    pub fn cpu_limit(&self) -> u64 {
        self.time_limit.saturating_add(CPU_LIMIT_SLACK)
    }

    /// Build the nsjail argument vector, program first
    pub fn command(
        &self,
        nsjail: &Path,
        base_config: Option<&Path>,
        python: &Path,
        scratch: &ScratchArea,
    ) -> Vec<String> {
        let mut args = vec![nsjail.to_string_lossy().into_owned()];

        args.extend(["--mode".to_string(), "o".to_string()]);
        if let Some(base) = base_config {
            args.extend(["--config".to_string(), base.display().to_string()]);
        }
        args.extend([
            "--log".to_string(),
            scratch.log_path().display().to_string(),
        ]);

        args.extend(flag("--hostname", SANDBOX_HOSTNAME));
        args.extend(flag("--cwd", &self.working_dir));
        args.extend(flag("--user", NOBODY));
        args.extend(flag("--group", NOBODY));

        // Resource limits
        args.extend(flag("--time_limit", self.time_limit));
        args.extend(flag("--rlimit_cpu", self.cpu_limit()));
        args.extend(flag("--rlimit_fsize", self.max_file_size));
        args.extend(flag("--rlimit_nofile", self.max_open_files));
        args.extend(flag("--rlimit_nproc", self.max_processes));
        if self.cgroup {
            args.push("--use_cgroupv2".to_string());
            args.extend(flag(
                "--cgroup_mem_max",
                self.memory_limit.saturating_mul(BYTES_PER_MB),
            ));
            args.extend(flag("--cgroup_pids_max", self.max_processes));
            args.extend(flag("--rlimit_as", "hard"));
        } else {
            args.extend(flag("--rlimit_as", self.memory_limit));
        }

        if self.network {
            args.push("--disable_clone_newnet".to_string());
        }

        // Mounts
        for mount in &self.mounts {
            // Skip optional mounts whose source doesn't exist
            if mount.optional && !Path::new(&mount.source).exists() {
                continue;
            }
            args.extend(flag(
                "--bindmount_ro",
                format!("{}:{}", mount.source, mount.target),
            ));
        }
        args.extend(flag(
            "--bindmount_ro",
            format!(
                "{}:{SANDBOX_ROOT}/{HARNESS_FILE}",
                scratch.harness_path().display()
            ),
        ));
        args.extend(flag(
            "--bindmount",
            format!("{}:{}", scratch.work_dir().display(), self.working_dir),
        ));
        args.extend(flag("--tmpfsmount", "/tmp"));

        // Environment
        for entry in &self.env {
            args.extend(flag("--env", entry));
        }

        // Separator and command
        args.push("--".to_string());
        args.extend(interpreter_command(
            python,
            &format!("{SANDBOX_ROOT}/{HARNESS_FILE}"),
        ));

        args
    }
}

/// Interpreter invocation for a harness file
///
/// `-u` keeps stdout and stderr unbuffered so their interleaving in the
/// combined stream matches the order the script wrote them.
pub fn interpreter_command(python: &Path, harness: &str) -> Vec<String> {
    vec![
        python.to_string_lossy().into_owned(),
        "-u".to_string(),
        "-s".to_string(),
        harness.to_string(),
    ]
}

fn flag(name: &str, value: impl ToString) -> [String; 2] {
    [name.to_string(), value.to_string()]
}

fn clamp(limit: ClampedLimit, requested: u64, ceiling: u64, clamped: &mut Vec<LimitClamp>) -> u64 {
    if requested > ceiling {
        tracing::warn!(?limit, requested, ceiling, "clamping limit to host ceiling");
        clamped.push(LimitClamp {
            limit,
            requested,
            applied: ceiling,
        });
        return ceiling;
    }
    // nsjail treats a zero time limit as unlimited
    requested.max(1)
}
