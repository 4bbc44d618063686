//! Output protocol parsing
//!
//! Splits the captured output of a harness run into user stdout and the
//! sentinel-framed payload, then classifies the run.
//!
//! Only text before the first open marker is treated as stdout. Anything
//! after the matching close marker is ignored.

use serde::Deserialize;
use tracing::debug;

use crate::harness::Sentinels;
use crate::types::ExecutionOutcome;

/// Error payload written by the harness trailer
#[derive(Debug, Deserialize)]
struct HarnessError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    #[serde(default)]
    traceback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Result,
    Error,
}

/// Classify a harness run from its combined output and exit code
pub fn parse_output(buffer: &[u8], sentinels: &Sentinels, exit_code: i32) -> ExecutionOutcome {
    let text = String::from_utf8_lossy(buffer);

    let result_at = text.find(&sentinels.result_open);
    let error_at = text.find(&sentinels.error_open);

    let (block, open_at) = match (result_at, error_at) {
        (Some(r), Some(e)) if e < r => (Block::Error, e),
        (Some(r), _) => (Block::Result, r),
        (None, Some(e)) => (Block::Error, e),
        (None, None) => return unframed(&text, exit_code),
    };

    let stdout = text[..open_at].to_string();
    let (open, close) = match block {
        Block::Result => (&sentinels.result_open, &sentinels.result_close),
        Block::Error => (&sentinels.error_open, &sentinels.error_close),
    };

    let body = &text[open_at + open.len()..];
    let Some(close_at) = body.find(close.as_str()) else {
        return ExecutionOutcome::ProtocolError {
            reason: "payload block has no closing marker".to_string(),
            raw: body.to_string(),
        };
    };
    let payload = &body[..close_at];

    debug!(?block, stdout_len = stdout.len(), payload_len = payload.len(), "found payload block");

    match block {
        Block::Result => match serde_json::from_str(payload) {
            Ok(result) => ExecutionOutcome::Success { result, stdout },
            Err(e) => ExecutionOutcome::ProtocolError {
                reason: format!("result payload is not valid JSON: {e}"),
                raw: payload.to_string(),
            },
        },
        Block::Error => match serde_json::from_str::<HarnessError>(payload) {
            Ok(error) => ExecutionOutcome::ScriptError {
                message: error.message,
                stdout,
                error_type: Some(error.kind),
                traceback: error.traceback,
            },
            Err(_) => ExecutionOutcome::ScriptError {
                message: payload.to_string(),
                stdout,
                error_type: None,
                traceback: None,
            },
        },
    }
}

/// Output with no markers at all
fn unframed(text: &str, exit_code: i32) -> ExecutionOutcome {
    if exit_code == 0 {
        return ExecutionOutcome::ProtocolError {
            reason: "process exited cleanly without emitting a result".to_string(),
            raw: text.to_string(),
        };
    }

    // An uncaught exception ends with its "Type: message" summary line
    let message = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("script exited with status {exit_code}"));

    ExecutionOutcome::ScriptError {
        message,
        stdout: text.to_string(),
        error_type: None,
        traceback: None,
    }
}
