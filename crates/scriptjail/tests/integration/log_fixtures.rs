use scriptjail::LimitKind;
use scriptjail::sandbox::{Diagnostics, ExitClass};

use super::FIXTURES_PATH;

fn load_log_fixture(name: &str) -> Diagnostics {
    let path = format!("{FIXTURES_PATH}/logs/{name}");
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read log fixture {path}: {e}"));
    Diagnostics::parse(&content)
}

#[test]
fn test_log_clean() {
    let diag = load_log_fixture("clean.log");
    assert_eq!(diag.lines.len(), 4);
    assert!(!diag.time_limit_hit());
    assert!(diag.setup_failure().is_none());
    assert_eq!(diag.classify(Some(0), None), ExitClass::Clean);
    assert_eq!(diag.classify(Some(1), None), ExitClass::Failed(1));
}

#[test]
fn test_log_time_limit() {
    let diag = load_log_fixture("time_limit.log");
    assert!(diag.time_limit_hit());
    assert_eq!(diag.classify(Some(137), None), ExitClass::TimeLimit);
}

#[test]
fn test_log_securebits() {
    let diag = load_log_fixture("securebits.log");
    let message = diag.setup_failure().expect("setup failure not detected");
    assert!(message.contains("PR_SET_SECUREBITS"));
    assert!(matches!(
        diag.classify(Some(255), None),
        ExitClass::SetupFailure(_)
    ));
    assert!(diag.summary().contains("Couldn't launch the child process"));
}

#[test]
fn test_log_cpu_limit() {
    let diag = load_log_fixture("cpu_limit.log");
    assert!(!diag.time_limit_hit());
    assert_eq!(
        diag.classify(Some(152), None),
        ExitClass::Limit(LimitKind::CpuTime)
    );
}
