use scriptjail::{ExecutionMethod, ExecutionOutcome, ExecutionRequest};
use serde_json::json;

use super::{fixture_script, scratch_is_empty, test_runner};

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_success_returns_value() {
    let (runner, scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("success.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    assert_eq!(
        report.outcome,
        ExecutionOutcome::Success {
            result: json!({"a": 1}),
            stdout: String::new(),
        }
    );
    assert_eq!(report.method, Some(ExecutionMethod::Nsjail));
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_exception_keeps_printed_output() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("print_then_fail.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::ScriptError {
            message,
            stdout,
            error_type,
            traceback,
        } => {
            assert_eq!(stdout, "x\n");
            assert_eq!(error_type.as_deref(), Some("ZeroDivisionError"));
            assert!(message.contains("division by zero"));
            assert!(traceback.unwrap_or_default().contains("ZeroDivisionError"));
        }
        other => panic!("expected ScriptError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_stdout_and_stderr_are_merged_in_order() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("mixed_output.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    assert_eq!(
        report.outcome,
        ExecutionOutcome::Success {
            result: json!([1, "two", null, true]),
            stdout: "first\nwarning\nsecond".to_string(),
        }
    );
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_missing_entry_point_is_script_error() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("no_entry_point.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::ScriptError { error_type, .. } => {
            assert_eq!(error_type.as_deref(), Some("EntryPointMissing"));
        }
        other => panic!("expected ScriptError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_non_serializable_return_is_reported() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("not_serializable.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::ScriptError { error_type, .. } => {
            assert_eq!(error_type.as_deref(), Some("SerializationError"));
        }
        ExecutionOutcome::ProtocolError { .. } => {}
        other => panic!("expected ScriptError or ProtocolError, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_printed_markers_cannot_forge_result() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("forged_marker.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::Success { result, stdout } => {
            assert_eq!(result, json!("real"));
            assert!(stdout.contains("999"));
        }
        other => panic!("expected Success, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_script_can_write_to_working_directory() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("work_dir.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    assert_eq!(
        report.outcome,
        ExecutionOutcome::Success {
            result: json!({"cwd": "/sandbox/work", "content": "hello"}),
            stdout: String::new(),
        }
    );
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_network_is_unreachable() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("network.py")).with_time_limit(5);

    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::Success { result, .. } => assert_eq!(result["connected"], false),
        other => panic!("expected Success, got {other:?}"),
    }
}
