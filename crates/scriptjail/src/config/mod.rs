use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{LimitBounds, MountConfig, ResourceLimits};

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../scriptjail.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Operator caps that requested limits are clamped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostCeiling {
    /// Seconds
    pub max_time_limit: u64,
    /// Megabytes
    pub max_memory_limit: u64,
}

impl Default for HostCeiling {
    fn default() -> Self {
        Self {
            max_time_limit: 300,
            max_memory_limit: 1024,
        }
    }
}

/// Config for scriptjail
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the nsjail binary (uses PATH if not absolute).
    #[serde(default)]
    pub nsjail_path: Option<PathBuf>,

    /// Base nsjail config file, passed with `--config` before the generated flags.
    #[serde(default)]
    pub nsjail_config: Option<PathBuf>,

    /// Interpreter run inside the sandbox (uses PATH if not absolute).
    #[serde(default)]
    pub python_path: Option<PathBuf>,

    /// Parent directory for scratch areas. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    /// Use nsjail's cgroup v2 limits instead of RLIMIT_AS.
    #[serde(default)]
    pub cgroup: bool,

    /// Limits applied when a request carries no overrides
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Range accepted for request overrides
    #[serde(default)]
    pub limit_bounds: LimitBounds,

    /// Hard caps; anything above is clamped
    #[serde(default)]
    pub host_ceiling: HostCeiling,

    /// Combined output bytes kept per invocation
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Seconds the supervisor waits past the time limit before killing
    #[serde(default = "default_supervision_overhead")]
    pub supervision_overhead: f64,

    /// Maximum concurrently running sandboxes
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_processes")]
    pub max_processes: u32,

    #[serde(default = "default_max_open_files")]
    pub max_open_files: u32,

    /// Megabytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Read-only mounts exposing the interpreter and its runtime
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// Environment set inside the sandbox, as `KEY=VALUE` entries
    #[serde(default)]
    pub env: Vec<String>,

    /// Run directly on the host if nsjail cannot set itself up
    #[serde(default)]
    pub fallback_to_direct: bool,
}

impl Config {
    /// Create a new config from the embedded defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with no mounts and no environment
    pub fn empty() -> Self {
        Self {
            nsjail_path: None,
            nsjail_config: None,
            python_path: None,
            scratch_root: None,
            cgroup: false,
            default_limits: ResourceLimits::default(),
            limit_bounds: LimitBounds::default(),
            host_ceiling: HostCeiling::default(),
            max_output_bytes: default_max_output_bytes(),
            supervision_overhead: default_supervision_overhead(),
            max_concurrency: default_max_concurrency(),
            max_processes: default_max_processes(),
            max_open_files: default_max_open_files(),
            max_file_size: default_max_file_size(),
            mounts: Vec::new(),
            env: Vec::new(),
            fallback_to_direct: false,
        }
    }

    /// Get the path to the nsjail binary
    pub fn nsjail_binary(&self) -> PathBuf {
        self.nsjail_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("nsjail"))
    }

    /// Get the path to the sandboxed interpreter
    pub fn python_binary(&self) -> PathBuf {
        self.python_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("python3"))
    }

    /// Directory scratch areas are created in
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Grace period past the time limit before the supervisor kills
    pub fn overhead(&self) -> Duration {
        Duration::try_from_secs_f64(self.supervision_overhead)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_supervision_overhead()))
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_supervision_overhead() -> f64 {
    5.0
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_processes() -> u32 {
    16
}

fn default_max_open_files() -> u32 {
    64
}

fn default_max_file_size() -> u64 {
    16
}
