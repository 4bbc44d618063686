use std::time::Duration;

use scriptjail::{ExecutionOutcome, ExecutionRequest};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{fixture_script, scratch_is_empty, test_runner};

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_check_finds_nsjail_and_python() {
    let (runner, _scratch) = test_runner();
    let report = runner.check().await.expect("check failed");
    assert!(report.nsjail.is_absolute());
    assert!(report.python.is_absolute());
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_concurrent_invocations_do_not_interfere() {
    let (runner, scratch) = test_runner();

    let mut handles = Vec::new();
    for i in 0..4 {
        let runner = runner.clone();
        let script = format!(
            "import os\n\ndef main():\n    print('run {i}')\n    open('marker', 'w').write('{i}')\n    return {{'i': {i}, 'files': sorted(os.listdir('.'))}}\n"
        );
        handles.push(tokio::spawn(async move {
            runner
                .submit(&ExecutionRequest::new(script).with_time_limit(10))
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let report = handle.await.unwrap().expect("request rejected");
        assert_eq!(
            report.outcome,
            ExecutionOutcome::Success {
                result: json!({"i": i, "files": ["marker"]}),
                stdout: format!("run {i}\n"),
            }
        );
    }

    assert_eq!(runner.available_slots(), runner.capacity());
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_cancel_kills_running_script() {
    let (runner, scratch) = test_runner();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let request = ExecutionRequest::new(fixture_script("infinite_loop.py")).with_time_limit(30);
    let report = runner.execute_with_cancel(&request, &token).await;

    assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
    assert!(report.elapsed < Duration::from_secs(10));
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_dropped_request_removes_scratch() {
    let (runner, scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("infinite_loop.py")).with_time_limit(30);

    let result = tokio::time::timeout(Duration::from_millis(500), runner.execute(&request)).await;
    assert!(result.is_err());

    assert!(scratch_is_empty(scratch.path()));
    assert_eq!(runner.available_slots(), runner.capacity());
}
