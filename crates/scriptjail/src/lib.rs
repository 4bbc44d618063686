//! A library for running untrusted Python scripts under nsjail.
//!
//! Scriptjail wraps a submitted script in a small harness that calls its
//! `main()` entry point, runs it inside an nsjail sandbox with time, memory
//! and process limits, and turns whatever happened into one structured
//! [`ExecutionOutcome`].
//!
//! # Features
//!
//! - **Sandboxed execution**: a fresh scratch area and nsjail instance per request.
//! - **Structured results**: the entry point's return value is framed on stdout with per-invocation sentinels and decoded as JSON.
//! - **Hard deadlines**: the whole process group is killed when the wall-clock bound passes or the request is cancelled.
//! - **Resource limits**: CPU time, memory (RLIMIT_AS or cgroup v2), file size, open files and processes.
//! - **TOML configuration**: defaults, accepted ranges, host ceilings and mounts.
//!
//! ```no_run
//! use scriptjail::{ExecutionRequest, Runner};
//!
//! # async fn run() {
//! let runner = Runner::with_defaults();
//! let request = ExecutionRequest::new("def main():\n    return {'a': 1}\n").with_time_limit(2);
//! let report = runner.submit(&request).await.unwrap();
//! println!("{}", report.outcome.kind());
//! # }
//! ```

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, HostCeiling};
pub use harness::{Harness, Sentinels};
pub use protocol::parse_output;
pub use runner::{CheckError, CheckReport, Invocation, Runner};
pub use sandbox::{SandboxConfig, SandboxError, ScratchArea};
pub use types::{
    ClampedLimit, ExecutionMethod, ExecutionOutcome, ExecutionReport, ExecutionRequest,
    LimitBounds, LimitClamp, LimitKind, MountConfig, RequestError, ResourceLimits,
};

pub mod config;
pub mod harness;
pub mod protocol;
pub mod runner;
pub mod sandbox;
pub mod types;
