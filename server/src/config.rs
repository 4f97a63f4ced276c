//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::env;

/// Deployment mode.
///
/// Outside production, a provider with no configured secret (or a request
/// with no signature header) is treated as verified so local tunnels work
/// without real credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Resolve `APP_ENV`. Unset means production; development is opt-in.
    fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value {
            Some(v) => Self::parse_str(v)
                .with_context(|| format!("APP_ENV has unsupported value {v:?}")),
            None => Ok(Self::Production),
        }
    }
}

/// Which storage implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Deployment mode (default: production)
    pub environment: Environment,

    /// Storage implementation (default: postgres)
    pub storage_backend: StorageBackend,

    /// `PostgreSQL` connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    /// Redis connection URL (optional, enables shared delivery dedup)
    pub redis_url: Option<String>,

    /// Social platform app secret used for `X-Hub-Signature-256`
    pub platform_app_secret: Option<String>,

    /// Token expected in the subscription handshake
    pub platform_verify_token: Option<String>,

    /// Payment provider endpoint secret
    pub payment_webhook_secret: Option<String>,

    /// Maximum age of a payment signature timestamp in seconds (default: 300)
    pub payment_signature_tolerance_secs: i64,

    /// Messages older than this many days are pruned (default: 90)
    pub message_retention_days: i64,

    /// Conversations silent for this many days are dormant (default: 7)
    pub dormancy_days: i64,

    /// Retention sweeper period in seconds (default: 3600)
    pub retention_interval_secs: u64,

    /// How long a delivered event id is remembered in seconds (default: 86400)
    pub dedup_ttl_secs: u64,

    /// Bearer key for the operator API (API is disabled when unset)
    pub operator_api_key: Option<String>,

    /// Lifetime of context facts extracted from messages, in hours (default: 24)
    pub default_context_ttl_hours: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_env_value(env::var("APP_ENV").ok().as_deref())?;

        let storage_backend = match env::var("STORAGE_BACKEND").as_deref() {
            Ok("memory") => StorageBackend::Memory,
            Ok("postgres") | Err(_) => StorageBackend::Postgres,
            Ok(other) => bail!("STORAGE_BACKEND must be 'postgres' or 'memory', got {other:?}"),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORAGE_BACKEND=postgres");
        }

        let config = Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            environment,
            storage_backend,
            database_url,
            redis_url: non_empty_var("REDIS_URL"),
            platform_app_secret: non_empty_var("PLATFORM_APP_SECRET"),
            platform_verify_token: non_empty_var("PLATFORM_VERIFY_TOKEN"),
            payment_webhook_secret: non_empty_var("PAYMENT_WEBHOOK_SECRET"),
            payment_signature_tolerance_secs: parsed_var("PAYMENT_SIGNATURE_TOLERANCE_SECS", 300)?,
            message_retention_days: parsed_var("MESSAGE_RETENTION_DAYS", 90)?,
            dormancy_days: parsed_var("DORMANCY_DAYS", 7)?,
            retention_interval_secs: parsed_var("RETENTION_INTERVAL_SECS", 3600)?,
            dedup_ttl_secs: parsed_var("DEDUP_TTL_SECS", 86_400)?,
            operator_api_key: non_empty_var("OPERATOR_API_KEY"),
            default_context_ttl_hours: parsed_var("DEFAULT_CONTEXT_TTL_HOURS", 24)?,
        };
        config.check_bounds()?;
        Ok(config)
    }

    /// Reject numeric settings outside their usable range.
    pub fn check_bounds(&self) -> Result<()> {
        check_range(
            "PAYMENT_SIGNATURE_TOLERANCE_SECS",
            self.payment_signature_tolerance_secs,
            1..=86_400,
        )?;
        check_range("MESSAGE_RETENTION_DAYS", self.message_retention_days, 1..=36_500)?;
        check_range("DORMANCY_DAYS", self.dormancy_days, 1..=3_650)?;
        check_range("DEFAULT_CONTEXT_TTL_HOURS", self.default_context_ttl_hours, 1..=87_600)?;
        if self.retention_interval_secs == 0 {
            bail!("RETENTION_INTERVAL_SECS must be at least 1");
        }
        if self.dedup_ttl_secs == 0 {
            bail!("DEDUP_TTL_SECS must be at least 1");
        }
        Ok(())
    }

    /// Age past which messages are pruned. `None` when out of range.
    pub fn message_retention(&self) -> Option<chrono::Duration> {
        positive_days(self.message_retention_days)
    }

    /// Silence after which a conversation is dormant. `None` when out of range.
    pub fn dormancy(&self) -> Option<chrono::Duration> {
        positive_days(self.dormancy_days)
    }

    /// Lifetime of extracted context facts. `None` when out of range.
    pub fn context_ttl(&self) -> Option<chrono::Duration> {
        Some(self.default_context_ttl_hours)
            .filter(|hours| *hours > 0)
            .and_then(chrono::Duration::try_hours)
    }

    /// Whether the development signature escape hatch is closed.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Create a default configuration for testing.
    ///
    /// Uses the in-memory store and fixed secrets so signed requests can be
    /// built deterministically in tests.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            environment: Environment::Production,
            storage_backend: StorageBackend::Memory,
            database_url: None,
            redis_url: None,
            platform_app_secret: Some("test-app-secret".into()),
            platform_verify_token: Some("test-verify-token".into()),
            payment_webhook_secret: Some("whsec_test_secret".into()),
            payment_signature_tolerance_secs: 300,
            message_retention_days: 90,
            dormancy_days: 7,
            retention_interval_secs: 3600,
            dedup_ttl_secs: 86_400,
            operator_api_key: Some("test-operator-key".into()),
            default_context_ttl_hours: 24,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, env::var(key).ok().as_deref(), default)
}

/// Parse a numeric setting. Unset or blank uses `default`; garbage is an error.
fn parse_value<T>(key: &str, raw: Option<&str>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value {v:?}: {e}")),
        None => Ok(default),
    }
}

fn check_range(key: &str, value: i64, range: std::ops::RangeInclusive<i64>) -> Result<()> {
    if !range.contains(&value) {
        bail!(
            "{key} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

fn positive_days(days: i64) -> Option<chrono::Duration> {
    Some(days)
        .filter(|days| *days > 0)
        .and_then(chrono::Duration::try_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::parse_str("PROD"), Some(Environment::Production));
        assert_eq!(Environment::parse_str("dev"), Some(Environment::Development));
        assert_eq!(Environment::parse_str("staging"), None);
    }

    #[test]
    fn test_config_is_production() {
        let config = Config::default_for_test();
        assert!(config.is_production());
        assert_eq!(config.payment_signature_tolerance_secs, 300);
        assert!(config.check_bounds().is_ok());
    }

    #[test]
    fn unset_app_env_is_production() {
        assert_eq!(Environment::from_env_value(None).unwrap(), Environment::Production);
        assert_eq!(
            Environment::from_env_value(Some("development")).unwrap(),
            Environment::Development
        );
        assert!(Environment::from_env_value(Some("staging")).is_err());
    }

    #[test]
    fn unparseable_numbers_are_errors() {
        assert_eq!(parse_value("DORMANCY_DAYS", None, 7_i64).unwrap(), 7);
        assert_eq!(parse_value("DORMANCY_DAYS", Some(" "), 7_i64).unwrap(), 7);
        assert_eq!(parse_value("DORMANCY_DAYS", Some("14"), 7_i64).unwrap(), 14);

        let err = parse_value("DORMANCY_DAYS", Some("seven"), 7_i64).unwrap_err();
        assert!(err.to_string().contains("DORMANCY_DAYS"));
        assert!(parse_value("DEDUP_TTL_SECS", Some("-1"), 60_u64).is_err());
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        let mut config = Config::default_for_test();
        config.message_retention_days = -1;
        assert!(config.check_bounds().is_err());

        let mut config = Config::default_for_test();
        config.dormancy_days = i64::MAX / 1000;
        assert!(config.check_bounds().is_err());

        let mut config = Config::default_for_test();
        config.default_context_ttl_hours = 0;
        assert!(config.check_bounds().is_err());

        let mut config = Config::default_for_test();
        config.retention_interval_secs = 0;
        assert!(config.check_bounds().is_err());
    }

    #[test]
    fn windows_are_none_when_unrepresentable() {
        let mut config = Config::default_for_test();
        assert_eq!(config.dormancy(), Some(chrono::Duration::days(7)));

        config.message_retention_days = -1;
        config.dormancy_days = i64::MAX / 1000;
        config.default_context_ttl_hours = i64::MAX;
        assert_eq!(config.message_retention(), None);
        assert_eq!(config.dormancy(), None);
        assert_eq!(config.context_ttl(), None);
    }
}
