use std::path::PathBuf;

use scriptjail::{Config, ConfigError};

use super::FIXTURES_PATH;

fn config_path(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

#[test]
fn test_load_valid_full_config() {
    let config = Config::from_file(config_path("valid_full.toml")).expect("Failed to load config");

    assert_eq!(config.nsjail_binary(), PathBuf::from("/usr/local/bin/nsjail"));
    assert_eq!(config.scratch_dir(), PathBuf::from("/var/tmp/scriptjail"));
    assert!(config.cgroup);
    assert_eq!(config.max_concurrency, 2);
    assert_eq!(config.max_output_bytes, 4096);
    assert_eq!(config.default_limits.time_limit, Some(5));
    assert_eq!(config.default_limits.memory_limit, Some(64));
    assert_eq!(config.limit_bounds.max_time_limit, 60);
    assert_eq!(config.limit_bounds.min_time_limit, 1);
    assert_eq!(config.host_ceiling.max_time_limit, 30);
    assert_eq!(config.mounts.len(), 2);
    assert!(config.mounts[1].optional);
}

#[test]
fn test_load_minimal_config_uses_defaults() {
    let config = Config::from_file(config_path("valid_minimal.toml")).expect("Failed to load config");

    assert_eq!(config.python_binary(), PathBuf::from("python3"));
    assert_eq!(config.default_limits.time_limit, Some(30));
    assert_eq!(config.default_limits.memory_limit, Some(128));
    assert!(!config.fallback_to_direct);
}

#[test]
fn test_load_invalid_zero_concurrency() {
    let result = Config::from_file(config_path("invalid_zero_concurrency.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_mount_target() {
    let result = Config::from_file(config_path("invalid_mount_target.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_env() {
    let result = Config::from_file(config_path("invalid_env.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_missing_file() {
    let result = Config::from_file(config_path("does_not_exist.toml"));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
