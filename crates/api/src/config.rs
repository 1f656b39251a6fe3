//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` PostgreSQL URL; orders are kept in memory when unset
/// - `EVENT_PARTITIONS` partitions per topic (default: `4`)
/// - `CONSUMER_RETRY_BACKOFF_MS` delay before redelivering a failed event (default: `1000`)
/// - `ASSEMBLY_TIME_UNIT_MS` real time per simulated build unit (default: `1000`)
/// - `SHUTDOWN_GRACE_SECS` time consumers get to finish in-flight work (default: `10`)
/// - `TEARDOWN_TIMEOUT_SECS` limit for releasing resources (default: `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub event_partitions: u32,
    pub consumer_retry_backoff: Duration,
    pub assembly_time_unit: Duration,
    pub shutdown_grace: Duration,
    pub teardown_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            event_partitions: lookup("EVENT_PARTITIONS")
                .and_then(|p| p.parse().ok())
                .filter(|p| *p > 0)
                .unwrap_or(defaults.event_partitions),
            consumer_retry_backoff: parsed("CONSUMER_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consumer_retry_backoff),
            assembly_time_unit: parsed("ASSEMBLY_TIME_UNIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.assembly_time_unit),
            shutdown_grace: parsed("SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            teardown_timeout: parsed("TEARDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.teardown_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            event_partitions: 4,
            consumer_retry_backoff: Duration::from_millis(1000),
            assembly_time_unit: Duration::from_millis(1000),
            shutdown_grace: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.event_partitions, 4);
        assert_eq!(config.consumer_retry_backoff, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("EVENT_PARTITIONS", "12"),
            ("CONSUMER_RETRY_BACKOFF_MS", "250"),
            ("ASSEMBLY_TIME_UNIT_MS", "5"),
            ("SHUTDOWN_GRACE_SECS", "3"),
            ("TEARDOWN_TIMEOUT_SECS", "2"),
        ]));
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
        assert_eq!(config.event_partitions, 12);
        assert_eq!(config.consumer_retry_backoff, Duration::from_millis(250));
        assert_eq!(config.assembly_time_unit, Duration::from_millis(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
        assert_eq!(config.teardown_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("EVENT_PARTITIONS", "0"),
            ("SHUTDOWN_GRACE_SECS", "-1"),
            ("DATABASE_URL", ""),
        ]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.event_partitions, 4);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert!(config.database_url.is_none());
    }
}
