use std::time::Duration;

use scriptjail::{ExecutionOutcome, ExecutionRequest, LimitKind};

use super::{fixture_script, scratch_is_empty, test_runner};

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_infinite_loop_times_out() {
    let (runner, scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("infinite_loop.py")).with_time_limit(2);

    let report = runner.submit(&request).await.expect("request rejected");

    match report.outcome {
        ExecutionOutcome::TimeoutError { time_limit, .. } => assert_eq!(time_limit, 2),
        other => panic!("expected TimeoutError, got {other:?}"),
    }
    assert!(report.elapsed >= Duration::from_secs(2));
    assert!(report.elapsed < Duration::from_secs(10));
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_memory_hog_hits_memory_limit() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("memory_hog.py"))
        .with_time_limit(10)
        .with_memory_limit(64);

    let report = runner.submit(&request).await.expect("request rejected");

    assert!(
        matches!(
            report.outcome,
            ExecutionOutcome::ResourceLimitExceeded {
                kind: LimitKind::Memory,
                ..
            }
        ),
        "unexpected outcome: {:?}",
        report.outcome
    );
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_output_flood_is_truncated() {
    let (runner, _scratch) = test_runner();
    let request = ExecutionRequest::new(fixture_script("flood_output.py")).with_time_limit(10);

    let report = runner.submit(&request).await.expect("request rejected");

    assert!(report.output_truncated);
    match report.outcome {
        ExecutionOutcome::ResourceLimitExceeded { kind, stdout, .. } => {
            assert_eq!(kind, LimitKind::Output);
            assert!(!stdout.is_empty());
            assert!(stdout.len() <= runner.config().max_output_bytes);
        }
        other => panic!("expected ResourceLimitExceeded, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires nsjail"]
async fn test_limits_above_ceiling_are_clamped() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = super::test_config(&scratch);
    config.host_ceiling.max_time_limit = 3;
    let runner = scriptjail::Runner::new(config);

    let request = ExecutionRequest::new(fixture_script("success.py")).with_time_limit(60);
    let report = runner.submit(&request).await.expect("request rejected");

    assert!(report.outcome.is_success());
    assert_eq!(report.clamped.len(), 1);
    assert_eq!(report.clamped[0].requested, 60);
    assert_eq!(report.clamped[0].applied, 3);
}
