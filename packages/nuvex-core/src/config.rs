//! Configuration surface for the storage engine.
//!
//! Plain structs with `Default` impls, following the teacher's
//! `NetworkConfig`/`ServerConfig` convention: no dynamic option bags, no
//! builder type, construct with `..Default::default()` when only a few
//! fields need overriding.

use std::time::Duration;

/// TLS mode for the L3 connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Off,
    #[default]
    Default,
    Custom,
}

/// Identifiers substituted into L3 DDL/DML. Every field is validated against
/// `^[A-Za-z_][A-Za-z0-9_]*$` before use.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    pub table_name: String,
    pub key_column: String,
    pub value_column: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            table_name: "nuvex_entries".to_string(),
            key_column: "key".to_string(),
            value_column: "value".to_string(),
        }
    }
}

/// L3 (Postgres) connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: SslMode,
    /// Pool size.
    pub max: u32,
    pub idle_timeout: Duration,
    pub connection_timeout: Duration,
    pub schema: SchemaConfig,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "nuvex".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            ssl: SslMode::default(),
            max: 10,
            idle_timeout: Duration::from_millis(30_000),
            connection_timeout: Duration::from_millis(10_000),
            schema: SchemaConfig::default(),
        }
    }
}

/// L2 (Redis) connection settings. `url` is `None` when the caller wants the
/// two-layer L1+L3 configuration.
#[derive(Debug, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
    /// Default cache TTL applied when warming L2 and no operation-level TTL
    /// is given.
    pub ttl: Duration,
}

/// L1 (in-process) cache settings.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub ttl: Duration,
    pub max_size: usize,
    /// Overrides the default cleanup cadence of `ttl / 24`.
    pub cleanup_interval: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(60_000),
            max_size: 10_000,
            cleanup_interval: None,
        }
    }
}

impl MemoryConfig {
    /// The cadence the cleanup scheduler actually runs at: the configured
    /// override, or `ttl / 24` otherwise.
    #[must_use]
    pub fn cleanup_cadence(&self) -> Duration {
        self.cleanup_interval
            .unwrap_or_else(|| self.ttl / 24)
    }
}

/// Structured log sink routing.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Name reported by the tracing fmt layer's target, not a destination
    /// path — logs always go to the process's configured subscriber.
    pub logger: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logger: "nuvex".to_string(),
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration for [`crate`]'s engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Merges `partial` into `self`, field by field, for `Client::configure`.
    /// Does not trigger a reconnect; the caller decides whether one is
    /// needed.
    pub fn merge(&mut self, partial: EngineConfigPatch) {
        if let Some(postgres) = partial.postgres {
            self.postgres = postgres;
        }
        if let Some(redis) = partial.redis {
            self.redis = redis;
        }
        if let Some(memory) = partial.memory {
            self.memory = memory;
        }
        if let Some(logging) = partial.logging {
            self.logging = logging;
        }
    }
}

/// A partial [`EngineConfig`] update, as accepted by `Client::configure`.
/// Every field absent means "leave as-is".
#[derive(Debug, Clone, Default)]
pub struct EngineConfigPatch {
    pub postgres: Option<PostgresConfig>,
    pub redis: Option<RedisConfig>,
    pub memory: Option<MemoryConfig>,
    pub logging: Option<LoggingConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_memory_config_matches_documented_defaults() {
        let cfg = MemoryConfig::default();
        assert_eq!(cfg.max_size, 10_000);
        assert_eq!(cfg.ttl, Duration::from_millis(60_000));
    }

    #[test]
    fn cleanup_cadence_falls_back_to_ttl_over_24() {
        let cfg = MemoryConfig {
            ttl: Duration::from_millis(2_400),
            max_size: 10,
            cleanup_interval: None,
        };
        assert_eq!(cfg.cleanup_cadence(), Duration::from_millis(100));
    }

    #[test]
    fn cleanup_cadence_prefers_explicit_override() {
        let cfg = MemoryConfig {
            ttl: Duration::from_millis(2_400),
            max_size: 10,
            cleanup_interval: Some(Duration::from_millis(5)),
        };
        assert_eq!(cfg.cleanup_cadence(), Duration::from_millis(5));
    }

    #[test]
    fn merge_only_overwrites_present_sections() {
        let mut cfg = EngineConfig::default();
        let original_postgres_host = cfg.postgres.host.clone();

        let mut patch = EngineConfigPatch::default();
        patch.memory = Some(MemoryConfig {
            max_size: 42,
            ..MemoryConfig::default()
        });
        cfg.merge(patch);

        assert_eq!(cfg.memory.max_size, 42);
        assert_eq!(cfg.postgres.host, original_postgres_host);
    }

    #[test]
    fn redis_config_default_has_no_url() {
        let cfg = RedisConfig::default();
        assert!(cfg.url.is_none());
    }
}
