//! nsjail log parsing
//!
//! nsjail writes its own messages to the file given with `--log`, one per
//! line, in the form `[L][timestamp][pid] message` where `L` is one of
//! `D`, `I`, `W`, `E` or `F`. Together with the exit status these lines
//! tell apart the jail failing to set itself up, a limit it enforced, and
//! the script simply exiting non-zero.

use std::path::Path;

use nix::sys::signal::Signal;

use crate::sandbox::SandboxError;
use crate::types::LimitKind;

/// Logged when nsjail kills the child for exceeding `--time_limit`
const TIME_LIMIT_MESSAGE: &str = "run time >= time limit";

/// Log messages that only appear when the jail could not be built
const SETUP_FAILURE_PATTERNS: &[&str] = &[
    "PR_SET_SECUREBITS",
    "Couldn't launch the child process",
    "Couldn't initialize",
    "clone(flags=",
    "Launching child process failed",
];

/// Severity of an nsjail log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "D" => Some(LogLevel::Debug),
            "I" => Some(LogLevel::Info),
            "W" => Some(LogLevel::Warning),
            "E" => Some(LogLevel::Error),
            "F" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

/// How the jailed process ended, as far as nsjail reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit status 0
    Clean,
    /// nsjail's own time limit fired
    TimeLimit,
    /// A resource limit killed the child
    Limit(LimitKind),
    /// The jail never got as far as running the interpreter
    SetupFailure(String),
    /// Non-zero exit that is the script's own doing
    Failed(i32),
}

/// Parsed nsjail log
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub lines: Vec<LogLine>,
}

impl Diagnostics {
    /// Parse log content
    ///
    /// Lines without a recognizable level tag are kept as continuation text
    /// of the previous line.
    pub fn parse(content: &str) -> Self {
        let mut lines: Vec<LogLine> = Vec::new();

        for raw in content.lines() {
            let raw = raw.trim_end();
            if raw.is_empty() {
                continue;
            }
            match parse_line(raw) {
                Some(line) => lines.push(line),
                None => {
                    if let Some(last) = lines.last_mut() {
                        last.message.push('\n');
                        last.message.push_str(raw);
                    } else {
                        lines.push(LogLine {
                            level: LogLevel::Info,
                            message: raw.to_string(),
                        });
                    }
                }
            }
        }

        Self { lines }
    }

    /// Load the log from disk. A missing log is treated as empty.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SandboxError> {
        match tokio::fs::read(path.as_ref()).await {
            Ok(bytes) => Ok(Self::parse(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether nsjail killed the child for exceeding `--time_limit`
    pub fn time_limit_hit(&self) -> bool {
        self.lines
            .iter()
            .any(|l| l.message.contains(TIME_LIMIT_MESSAGE))
    }

    /// Whether the log mentions the OOM killer
    pub fn oom(&self) -> bool {
        self.lines.iter().any(|l| {
            let message = l.message.to_ascii_lowercase();
            message.contains("oom_kill")
                || message.contains("oom-kill")
                || message.contains("out of memory")
        })
    }

    /// First message explaining why the jail could not be set up
    pub fn setup_failure(&self) -> Option<&str> {
        let known = self.lines.iter().find(|l| {
            SETUP_FAILURE_PATTERNS
                .iter()
                .any(|pattern| l.message.contains(pattern))
        });
        known
            .or_else(|| self.lines.iter().find(|l| l.level == LogLevel::Fatal))
            .map(|l| l.message.as_str())
    }

    /// Messages at warning level or above, for attaching to error reports
    pub fn summary(&self) -> String {
        self.lines
            .iter()
            .filter(|l| l.level >= LogLevel::Warning)
            .map(|l| l.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Classify nsjail's exit
    ///
    /// `exit_code` is nsjail's own status; it mirrors the child's and uses
    /// `128 + signo` when the child died from a signal. `signal` is set when
    /// nsjail itself was killed. A SIGKILL is only attributed to memory when
    /// the log names the OOM killer.
    pub fn classify(&self, exit_code: Option<i32>, signal: Option<i32>) -> ExitClass {
        let code = match (exit_code, signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => -1,
        };

        if code == 0 {
            return ExitClass::Clean;
        }

        if self.time_limit_hit() {
            return ExitClass::TimeLimit;
        }

        if let Some(message) = self.setup_failure()
            && (code == 255 || self.is_known_setup_failure())
        {
            return ExitClass::SetupFailure(message.to_string());
        }

        match code.checked_sub(128).and_then(|s| Signal::try_from(s).ok()) {
            Some(Signal::SIGXCPU) => ExitClass::Limit(LimitKind::CpuTime),
            Some(Signal::SIGXFSZ) => ExitClass::Limit(LimitKind::FileSize),
            Some(Signal::SIGKILL) if self.oom() => ExitClass::Limit(LimitKind::Memory),
            _ => ExitClass::Failed(code),
        }
    }

    fn is_known_setup_failure(&self) -> bool {
        self.lines.iter().any(|l| {
            SETUP_FAILURE_PATTERNS
                .iter()
                .any(|pattern| l.message.contains(pattern))
        })
    }
}

/// Split `[L][timestamp][pid] message`
fn parse_line(raw: &str) -> Option<LogLine> {
    let rest = raw.strip_prefix('[')?;
    let (tag, mut rest) = rest.split_once(']')?;
    let level = LogLevel::from_tag(tag)?;

    // Skip the remaining bracketed fields
    while let Some(inner) = rest.strip_prefix('[') {
        match inner.split_once(']') {
            Some((_, after)) => rest = after,
            None => break,
        }
    }

    Some(LogLine {
        level,
        message: rest.trim().to_string(),
    })
}
