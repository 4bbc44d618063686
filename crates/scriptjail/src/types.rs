use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Resource limits for a single script execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Time limit in seconds
    #[serde(default)]
    pub time_limit: Option<u64>,

    /// Memory limit in megabytes
    #[serde(default)]
    pub memory_limit: Option<u64>,
}

impl ResourceLimits {
    /// Default time limit in seconds
    pub const DEFAULT_TIME_LIMIT: u64 = 30;
    /// Default memory limit in megabytes
    pub const DEFAULT_MEMORY_LIMIT: u64 = 128;

    /// Create new resource limits with the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, useful as an override set
    pub fn unset() -> Self {
        Self {
            time_limit: None,
            memory_limit: None,
        }
    }

    /// Set the time limit in seconds
    pub fn with_time_limit(mut self, seconds: u64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in megabytes
    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(Self::DEFAULT_TIME_LIMIT),
            memory_limit: Some(Self::DEFAULT_MEMORY_LIMIT),
        }
    }
}

/// Inclusive ranges a request's limit overrides must fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitBounds {
    #[serde(default = "default_min_time")]
    pub min_time_limit: u64,
    #[serde(default = "default_max_time")]
    pub max_time_limit: u64,
    #[serde(default = "default_min_memory")]
    pub min_memory_limit: u64,
    #[serde(default = "default_max_memory")]
    pub max_memory_limit: u64,
}

impl Default for LimitBounds {
    fn default() -> Self {
        Self {
            min_time_limit: default_min_time(),
            max_time_limit: default_max_time(),
            min_memory_limit: default_min_memory(),
            max_memory_limit: default_max_memory(),
        }
    }
}

fn default_min_time() -> u64 {
    1
}

fn default_max_time() -> u64 {
    300
}

fn default_min_memory() -> u64 {
    1
}

fn default_max_memory() -> u64 {
    1024
}

/// Errors raised when a request is rejected before execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("script content cannot be empty")]
    EmptyScript,

    #[error("time limit must be between {min} and {max} seconds, got {value}")]
    TimeLimitOutOfRange { value: u64, min: u64, max: u64 },

    #[error("memory limit must be between {min} and {max} MB, got {value}")]
    MemoryLimitOutOfRange { value: u64, min: u64, max: u64 },
}

/// A script submitted for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Script body. Must define the entry point.
    pub script: String,

    /// Time limit override in seconds
    #[serde(default, alias = "timeout")]
    pub time_limit: Option<u64>,

    /// Memory limit override in megabytes
    #[serde(default, alias = "memory")]
    pub memory_limit: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            time_limit: None,
            memory_limit: None,
        }
    }

    pub fn with_time_limit(mut self, seconds: u64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb);
        self
    }

    /// The limit overrides carried by this request
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            time_limit: self.time_limit,
            memory_limit: self.memory_limit,
        }
    }

    /// Check structural validity against the configured bounds
    pub fn validate(&self, bounds: &LimitBounds) -> Result<(), RequestError> {
        if self.script.trim().is_empty() {
            return Err(RequestError::EmptyScript);
        }

        if let Some(value) = self.time_limit
            && !(bounds.min_time_limit..=bounds.max_time_limit).contains(&value)
        {
            return Err(RequestError::TimeLimitOutOfRange {
                value,
                min: bounds.min_time_limit,
                max: bounds.max_time_limit,
            });
        }

        if let Some(value) = self.memory_limit
            && !(bounds.min_memory_limit..=bounds.max_memory_limit).contains(&value)
        {
            return Err(RequestError::MemoryLimitOutOfRange {
                value,
                min: bounds.min_memory_limit,
                max: bounds.max_memory_limit,
            });
        }

        Ok(())
    }
}

/// Which resource limit the isolation layer enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// Memory ceiling (cgroup OOM kill, RLIMIT_AS, or an interpreter MemoryError)
    Memory,
    /// CPU time (SIGXCPU)
    CpuTime,
    /// Captured output exceeded the supervisor's byte ceiling
    Output,
    /// File size limit (SIGXFSZ)
    FileSize,
}

/// Final result of one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The entry point returned a value
    Success {
        result: serde_json::Value,
        stdout: String,
    },

    /// The script raised, exited non-zero, or reported a harness error
    ScriptError {
        message: String,
        stdout: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },

    /// The wall-clock deadline elapsed and the process group was killed
    TimeoutError { time_limit: u64, stdout: String },

    /// The isolation layer's own enforcement fired
    ResourceLimitExceeded {
        kind: LimitKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        stdout: String,
    },

    /// Output did not conform to the sentinel framing
    ProtocolError { reason: String, raw: String },

    /// The isolation layer could not be started
    LaunchError { message: String },

    /// The owning request was aborted before the child finished
    Cancelled,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Short machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::ScriptError { .. } => "script_error",
            ExecutionOutcome::TimeoutError { .. } => "timeout_error",
            ExecutionOutcome::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            ExecutionOutcome::ProtocolError { .. } => "protocol_error",
            ExecutionOutcome::LaunchError { .. } => "launch_error",
            ExecutionOutcome::Cancelled => "cancelled",
        }
    }

    /// Captured user stdout, where the variant carries any
    pub fn stdout(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { stdout, .. }
            | ExecutionOutcome::ScriptError { stdout, .. }
            | ExecutionOutcome::TimeoutError { stdout, .. }
            | ExecutionOutcome::ResourceLimitExceeded { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

/// Which limit a clamp applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampedLimit {
    TimeLimit,
    MemoryLimit,
}

/// A requested limit that was lowered to the host ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitClamp {
    pub limit: ClampedLimit,
    pub requested: u64,
    pub applied: u64,
}

/// How the harness was actually executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    /// Inside the nsjail isolation layer
    Nsjail,
    /// Directly on the host after an isolation-layer setup failure
    Direct,
}

/// Everything the caller gets back from one invocation
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Invocation id, also the scratch area suffix
    pub id: String,

    pub outcome: ExecutionOutcome,

    /// Wall-clock time from staging to teardown
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    /// Limits lowered to the host ceiling
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clamped: Vec<LimitClamp>,

    /// Whether output beyond the capture ceiling was discarded
    pub output_truncated: bool,

    /// None when the child never ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<ExecutionMethod>,
}

fn serialize_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// Configuration for a directory mount in the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Read-write mounts are rejected by config validation; only the
    /// per-invocation working directory is writable
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (skipped if the source doesn't exist)
    #[serde(default)]
    pub optional: bool,
}

impl MountConfig {
    /// Read-only bind of a host path at the same location inside the sandbox
    pub fn read_only(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: path,
            writable: false,
            optional: false,
        }
    }
}
