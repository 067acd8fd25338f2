//! Core configuration record.
//!
//! Immutable once the engines are constructed. Loaded by
//! `infrastructure::config::ConfigLoader` from defaults, YAML, and
//! `TASCADE_`-prefixed environment variables.

use serde::{Deserialize, Serialize};

use super::lease::{DEFAULT_LEASE_TTL_SECONDS, DEFAULT_RESERVATION_TTL_SECONDS};

/// Hard cap on context retrieval depth in either direction.
pub const MAX_CONTEXT_DEPTH: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or `:memory:`.
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".tascade/tascade.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub default_ancestor_depth: u32,
    pub default_dependent_depth: u32,
    /// Cache entries older than this are evicted by the GC sweep.
    pub cache_ttl_seconds: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_ancestor_depth: 2,
            default_dependent_depth: 1,
            cache_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub interval_seconds: u64,
    /// Rows handled per sweep transaction.
    pub batch_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 15,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    /// Test-only escape hatch: transports may skip authentication. The core
    /// engines still require a principal; this flag is surfaced for them.
    pub auth_disabled: bool,
    pub default_lease_ttl_seconds: i64,
    pub default_reservation_ttl_seconds: i64,
    /// How long before lease expiry a heartbeat is expected.
    pub heartbeat_window_seconds: i64,
    pub context: ContextConfig,
    pub sweep: SweepConfig,
    pub gate_tick_seconds: u64,
    pub logging: LoggingConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            auth_disabled: false,
            default_lease_ttl_seconds: DEFAULT_LEASE_TTL_SECONDS,
            default_reservation_ttl_seconds: DEFAULT_RESERVATION_TTL_SECONDS,
            heartbeat_window_seconds: 300,
            context: ContextConfig::default(),
            sweep: SweepConfig::default(),
            gate_tick_seconds: 30,
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.default_reservation_ttl_seconds, 1_800);
        assert_eq!(cfg.context.default_ancestor_depth, 2);
        assert_eq!(cfg.context.default_dependent_depth, 1);
        assert!(!cfg.auth_disabled);
    }
}
