//! Integration tests for scriptjail
//!
//! Tests that run scripts need the nsjail binary and python3 and are marked
//! `#[ignore]`. Run with:
//!    cargo test -p scriptjail --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::Path;

use scriptjail::{Config, Runner};
use tempfile::TempDir;

mod config_loading;
mod execution;
mod fallback;
mod log_fixtures;
mod resource_limits;
mod sandbox_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture script content
pub(crate) fn fixture_script(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/scripts/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Default config with scratch areas kept under a private temporary root
pub(crate) fn test_config(scratch: &TempDir) -> Config {
    Config {
        scratch_root: Some(scratch.path().to_path_buf()),
        supervision_overhead: 1.0,
        ..Config::default()
    }
}

/// Runner over [`test_config`], plus the scratch root it writes to
pub(crate) fn test_runner() -> (Runner, TempDir) {
    let scratch = tempfile::tempdir().expect("Failed to create scratch root");
    (Runner::new(test_config(&scratch)), scratch)
}

/// Whether every scratch area under `root` has been removed
pub(crate) fn scratch_is_empty(root: &Path) -> bool {
    fs::read_dir(root)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
