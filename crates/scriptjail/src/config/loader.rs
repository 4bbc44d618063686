//! Configuration file loading for scriptjail
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};
use crate::types::ResourceLimits;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        Self::finish(config.try_deserialize()?)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        Self::finish(config.try_deserialize()?)
    }

    /// Fill unset default limits from the built-in defaults and validate
    fn finish(mut config: Config) -> Result<Self, ConfigError> {
        config.default_limits = ResourceLimits::default().with_overrides(&config.default_limits);
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_output_bytes must be at least 1".to_string(),
            ));
        }
        if !self.supervision_overhead.is_finite() || self.supervision_overhead < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "supervision_overhead must be a non-negative number of seconds, got {}",
                self.supervision_overhead
            )));
        }

        let bounds = &self.limit_bounds;
        if bounds.min_time_limit == 0 || bounds.min_time_limit > bounds.max_time_limit {
            return Err(ConfigError::Invalid(format!(
                "limit_bounds time range {}..={} is empty or starts at zero",
                bounds.min_time_limit, bounds.max_time_limit
            )));
        }
        if bounds.min_memory_limit == 0 || bounds.min_memory_limit > bounds.max_memory_limit {
            return Err(ConfigError::Invalid(format!(
                "limit_bounds memory range {}..={} is empty or starts at zero",
                bounds.min_memory_limit, bounds.max_memory_limit
            )));
        }

        for (name, value) in [
            ("default_limits.time_limit", self.default_limits.time_limit),
            ("default_limits.memory_limit", self.default_limits.memory_limit),
        ] {
            match value {
                None => {
                    return Err(ConfigError::Invalid(format!("{name} must be set")));
                }
                Some(0) => {
                    return Err(ConfigError::Invalid(format!("{name} must be positive")));
                }
                Some(_) => {}
            }
        }

        if self.host_ceiling.max_time_limit == 0 || self.host_ceiling.max_memory_limit == 0 {
            return Err(ConfigError::Invalid(
                "host_ceiling values must be positive".to_string(),
            ));
        }

        for mount in &self.mounts {
            if mount.writable {
                return Err(ConfigError::Invalid(format!(
                    "mount '{}' must be read-only; scripts only write to their working directory",
                    mount.target
                )));
            }
            if !mount.target.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "mount target '{}' must be an absolute path",
                    mount.target
                )));
            }
            if mount.target.starts_with(crate::sandbox::SANDBOX_ROOT) {
                return Err(ConfigError::Invalid(format!(
                    "mount target '{}' overlaps the scratch mount point",
                    mount.target
                )));
            }
        }

        for entry in &self.env {
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "env entry '{entry}' must have the form KEY=VALUE"
                    )));
                }
            }
        }

        Ok(())
    }
}
