//! Direct execution when nsjail cannot set itself up
//!
//! Uses a shell script standing in for nsjail that fails the way nsjail does
//! on hosts that forbid PR_SET_SECUREBITS.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use scriptjail::{Config, ExecutionMethod, ExecutionOutcome, ExecutionRequest, Runner};
use serde_json::json;

use super::{fixture_script, scratch_is_empty, test_config};

const FAILING_NSJAIL: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
    if [ "$1" = "--log" ]; then
        echo "[E][t][1] initNs():193 prctl(PR_SET_SECUREBITS, SECBIT_KEEP_CAPS): Operation not permitted" > "$2"
        echo "[F][t][1] runChild():483 Launching child process failed" >> "$2"
    fi
    shift
done
exit 255
"#;

fn failing_nsjail(dir: &Path) -> PathBuf {
    let path = dir.join("nsjail");
    std::fs::write(&path, FAILING_NSJAIL).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(bin: &Path, scratch: &tempfile::TempDir, fallback: bool) -> Config {
    Config {
        nsjail_path: Some(failing_nsjail(bin)),
        fallback_to_direct: fallback,
        ..test_config(scratch)
    }
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_setup_failure_falls_back_to_direct() {
    let bin = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let runner = Runner::new(config(bin.path(), &scratch, true));

    let request = ExecutionRequest::new(fixture_script("success.py")).with_time_limit(5);
    let report = runner.submit(&request).await.expect("request rejected");

    assert_eq!(
        report.outcome,
        ExecutionOutcome::Success {
            result: json!({"a": 1}),
            stdout: String::new(),
        }
    );
    assert_eq!(report.method, Some(ExecutionMethod::Direct));
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_direct_run_keeps_script_errors() {
    let bin = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let runner = Runner::new(config(bin.path(), &scratch, true));

    let request = ExecutionRequest::new(fixture_script("print_then_fail.py")).with_time_limit(5);
    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::ScriptError {
            stdout, error_type, ..
        } => {
            assert_eq!(stdout, "x\n");
            assert_eq!(error_type.as_deref(), Some("ZeroDivisionError"));
        }
        other => panic!("expected ScriptError, got {other:?}"),
    }
    assert_eq!(report.method, Some(ExecutionMethod::Direct));
}

#[tokio::test]
#[ignore = "requires python3"]
async fn test_setup_failure_without_fallback_is_launch_error() {
    let bin = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let runner = Runner::new(config(bin.path(), &scratch, false));

    let request = ExecutionRequest::new(fixture_script("success.py")).with_time_limit(5);
    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::LaunchError { message } => {
            assert!(message.contains("PR_SET_SECUREBITS"));
        }
        other => panic!("expected LaunchError, got {other:?}"),
    }
    assert_eq!(report.method, Some(ExecutionMethod::Nsjail));
}
