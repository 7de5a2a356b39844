//! Configuration management.
//!
//! Values come from `AGORA__*` environment variables (for example
//! `AGORA__DATABASE__URL` or `AGORA__GUARD__ROLE_CACHE_TTL=90s`) and, when
//! [`Config::from_file`] is used, from a config file layered underneath.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{AgoraError, Result};
use crate::guard::{CacheFailurePolicy, RoleLevel};

/// Environment variable prefix.
const ENV_PREFIX: &str = "AGORA";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Token signing and session configuration
    #[serde(default)]
    pub auth: AuthSettings,

    /// Authorization guard configuration
    #[serde(default)]
    pub guard: GuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-command response timeout
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Install the Prometheus recorder backing `GET /metrics`
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// HMAC secret used to sign and verify access tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default)]
    pub issuer: Option<String>,

    /// Lifetime of issued access tokens
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Clock skew tolerated when validating `exp`
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,

    /// Identity that receives an admin session at startup when it has none
    #[serde(default)]
    pub bootstrap_admin: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: None,
            session_ttl: default_session_ttl(),
            leeway_secs: default_leeway_secs(),
            bootstrap_admin: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Lifetime of cached role levels. `None` keeps entries until invalidated.
    #[serde(default = "default_role_cache_ttl", with = "humantime_serde")]
    pub role_cache_ttl: Option<Duration>,

    /// Behavior when the cache cannot be read
    #[serde(default)]
    pub cache_failure_policy: CacheFailurePolicy,

    /// Reject operations missing from the registry
    #[serde(default)]
    pub strict_operations: bool,

    /// Role level granted to the bootstrap admin session
    #[serde(default = "default_bootstrap_level")]
    pub bootstrap_level: RoleLevel,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            role_cache_ttl: default_role_cache_ttl(),
            cache_failure_policy: CacheFailurePolicy::default(),
            strict_operations: false,
            bootstrap_level: default_bootstrap_level(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "agora:".to_string() }
fn default_response_timeout() -> Duration { Duration::from_secs(2) }
fn default_connect_timeout() -> Duration { Duration::from_secs(5) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_enabled() -> bool { true }
/// Upper bound on configured lifetimes.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn default_session_ttl() -> Duration { Duration::from_secs(12 * 60 * 60) }
fn default_leeway_secs() -> u64 { 30 }
fn default_role_cache_ttl() -> Option<Duration> { Some(Duration::from_secs(300)) }
fn default_bootstrap_level() -> RoleLevel { RoleLevel::new(1) }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Configuration with every section at its default and the given
    /// database URL and signing secret.
    pub fn with_defaults(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::new(database_url),
            redis: RedisConfig::default(),
            observability: ObservabilityConfig::default(),
            auth: AuthSettings {
                jwt_secret: jwt_secret.into(),
                ..AuthSettings::default()
            },
            guard: GuardConfig::default(),
        }
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(AgoraError::configuration("auth.jwt_secret must be set"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(AgoraError::configuration(
                "database.min_connections exceeds database.max_connections",
            ));
        }
        if self.guard.role_cache_ttl == Some(Duration::ZERO) {
            return Err(AgoraError::configuration(
                "guard.role_cache_ttl must be positive; omit it to disable expiry",
            ));
        }
        if self.guard.role_cache_ttl.is_some_and(|ttl| ttl > MAX_TTL) {
            return Err(AgoraError::configuration(
                "guard.role_cache_ttl exceeds ten years; omit it to disable expiry",
            ));
        }
        if self.auth.session_ttl > MAX_TTL {
            return Err(AgoraError::configuration("auth.session_ttl exceeds ten years"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(source: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = from_toml(
            r#"
            [database]
            url = "postgres://localhost/agora"
            "#,
        );

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.redis.key_prefix, "agora:");
        assert_eq!(cfg.guard.role_cache_ttl, Some(Duration::from_secs(300)));
        assert_eq!(cfg.guard.cache_failure_policy, CacheFailurePolicy::FailClosed);
        assert!(!cfg.guard.strict_operations);
        assert_eq!(cfg.auth.session_ttl, Duration::from_secs(43_200));
    }

    #[test]
    fn test_humantime_durations() {
        let cfg = from_toml(
            r#"
            [database]
            url = "postgres://localhost/agora"
            acquire_timeout = "750ms"

            [guard]
            role_cache_ttl = "90s"
            cache_failure_policy = "bypass_cache"
            "#,
        );

        assert_eq!(cfg.database.acquire_timeout, Duration::from_millis(750));
        assert_eq!(cfg.guard.role_cache_ttl, Some(Duration::from_secs(90)));
        assert_eq!(cfg.guard.cache_failure_policy, CacheFailurePolicy::BypassCache);
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let cfg = Config::with_defaults("postgres://localhost/agora", "  ");
        assert!(cfg.validate().is_err());

        let cfg = Config::with_defaults("postgres://localhost/agora", "s3cret");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut cfg = Config::with_defaults("postgres://localhost/agora", "s3cret");
        cfg.guard.role_cache_ttl = Some(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_ttls() {
        let mut cfg = Config::with_defaults("postgres://localhost/agora", "s3cret");
        cfg.guard.role_cache_ttl = Some(Duration::MAX);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::with_defaults("postgres://localhost/agora", "s3cret");
        cfg.auth.session_ttl = Duration::MAX;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::with_defaults("postgres://localhost/agora", "s3cret");
        cfg.guard.role_cache_ttl = None;
        assert!(cfg.validate().is_ok());
    }
}
