use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::{CoreConfig, MAX_CONTEXT_DEPTH};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid lease TTL: {0}. Must be within [60, 86400] seconds")]
    InvalidLeaseTtl(i64),

    #[error("Invalid reservation TTL: {0}. Must be within [60, 86400] seconds")]
    InvalidReservationTtl(i64),

    #[error("Invalid context depth default: {0}. Must be at most {MAX_CONTEXT_DEPTH}")]
    InvalidContextDepth(u32),

    #[error("Invalid sweep batch size: {0}. Must be at least 1")]
    InvalidSweepBatch(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration, lowest to highest precedence:
    /// 1. Programmatic defaults
    /// 2. `.tascade/config.yaml`
    /// 3. Environment variables (`TASCADE_` prefix)
    pub fn load() -> Result<CoreConfig> {
        let config: CoreConfig = Figment::new()
            .merge(Serialized::defaults(CoreConfig::default()))
            .merge(Yaml::file(".tascade/config.yaml"))
            .merge(Env::prefixed("TASCADE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<CoreConfig> {
        let config: CoreConfig = Figment::new()
            .merge(Serialized::defaults(CoreConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &CoreConfig) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let ttl_range = 60..=86_400;
        if !ttl_range.contains(&config.default_lease_ttl_seconds) {
            return Err(ConfigError::InvalidLeaseTtl(config.default_lease_ttl_seconds));
        }
        if !ttl_range.contains(&config.default_reservation_ttl_seconds) {
            return Err(ConfigError::InvalidReservationTtl(
                config.default_reservation_ttl_seconds,
            ));
        }

        if config.context.default_ancestor_depth > MAX_CONTEXT_DEPTH {
            return Err(ConfigError::InvalidContextDepth(config.context.default_ancestor_depth));
        }
        if config.context.default_dependent_depth > MAX_CONTEXT_DEPTH {
            return Err(ConfigError::InvalidContextDepth(config.context.default_dependent_depth));
        }
        if config.sweep.batch_size == 0 {
            return Err(ConfigError::InvalidSweepBatch(config.sweep.batch_size));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ConfigLoader::validate(&CoreConfig::default()).is_ok());
    }

    #[test]
    fn out_of_range_ttl_is_rejected() {
        let mut config = CoreConfig::default();
        config.default_lease_ttl_seconds = 10;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLeaseTtl(10))
        ));
    }

    #[test]
    fn depth_defaults_above_cap_are_rejected() {
        let mut config = CoreConfig::default();
        config.context.default_ancestor_depth = 9;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidContextDepth(9))
        ));
    }
}
