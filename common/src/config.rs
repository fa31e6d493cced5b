//! Typed settings read from the environment.
//!
//! Every binary calls [`Config::from_env`], which loads `.env` first. Unset
//! variables fall back to defaults; set but malformed ones are errors.

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use outbox::{RetryOverrides, RetryPreset};
use thiserror::Error;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";
pub const USER_GRPC_ADDR: &str = "USER_GRPC_ADDR";
pub const PRODUCT_GRPC_ADDR: &str = "PRODUCT_GRPC_ADDR";
pub const CONSUMER_POLL_INTERVAL_MS: &str = "CONSUMER_POLL_INTERVAL_MS";
pub const CONSUMER_GROUP_PREFIX: &str = "CONSUMER_GROUP_PREFIX";
pub const RETRY_TYPE: &str = "RETRY_TYPE";
pub const RETRY_MAX_RETRIES: &str = "RETRY_MAX_RETRIES";
pub const RETRY_INITIAL_INTERVAL_MS: &str = "RETRY_INITIAL_INTERVAL_MS";
pub const RETRY_MAX_INTERVAL_MS: &str = "RETRY_MAX_INTERVAL_MS";
pub const RETRY_MULTIPLIER: &str = "RETRY_MULTIPLIER";
pub const RETRY_MAX_ELAPSED_MS: &str = "RETRY_MAX_ELAPSED_MS";
pub const RETRY_RANDOMIZATION_FACTOR: &str = "RETRY_RANDOMIZATION_FACTOR";
pub const LOG_FORMAT: &str = "LOG_FORMAT";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}, expected pretty or json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub poll_interval: Duration,
    pub group_prefix: String,
    pub retry: RetryOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub user_addr: SocketAddr,
    pub product_addr: SocketAddr,
    pub consumer: ConsumerConfig,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let database = DatabaseConfig {
            url: vars.get(DATABASE_URL).ok_or(ConfigError::Missing(DATABASE_URL))?,
            max_connections: vars.parse(DATABASE_MAX_CONNECTIONS)?.unwrap_or(5),
        };

        let consumer = ConsumerConfig {
            poll_interval: vars
                .millis(CONSUMER_POLL_INTERVAL_MS)?
                .unwrap_or(Duration::from_secs(1)),
            group_prefix: vars
                .get(CONSUMER_GROUP_PREFIX)
                .unwrap_or_else(|| "consumer".to_string()),
            retry: RetryOverrides {
                preset: vars
                    .get(RETRY_TYPE)
                    .map(|name| RetryPreset::from_name(&name))
                    .unwrap_or_default(),
                max_retries: vars.parse(RETRY_MAX_RETRIES)?,
                initial_interval: vars.millis(RETRY_INITIAL_INTERVAL_MS)?,
                max_interval: vars.millis(RETRY_MAX_INTERVAL_MS)?,
                multiplier: vars.parse(RETRY_MULTIPLIER)?,
                max_elapsed_time: vars.millis(RETRY_MAX_ELAPSED_MS)?,
                randomization_factor: vars.parse(RETRY_RANDOMIZATION_FACTOR)?,
            },
        };

        Ok(Self {
            database,
            user_addr: vars.parse(USER_GRPC_ADDR)?.unwrap_or_else(|| default_addr(50051)),
            product_addr: vars.parse(PRODUCT_GRPC_ADDR)?.unwrap_or_else(|| default_addr(50052)),
            consumer,
            log_format: vars.parse(LOG_FORMAT)?.unwrap_or_default(),
        })
    }
}

fn default_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; empty counts as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[(DATABASE_URL, "postgres://localhost/catalog")]).unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.user_addr, "0.0.0.0:50051".parse().unwrap());
        assert_eq!(config.product_addr, "0.0.0.0:50052".parse().unwrap());
        assert_eq!(config.consumer.poll_interval, Duration::from_secs(1));
        assert_eq!(config.consumer.group_prefix, "consumer");
        assert_eq!(config.consumer.retry, RetryOverrides::default());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(load(&[]), Err(ConfigError::Missing(DATABASE_URL)));
        assert_eq!(
            load(&[(DATABASE_URL, "  ")]),
            Err(ConfigError::Missing(DATABASE_URL))
        );
    }

    #[test]
    fn retry_settings_are_read() {
        let config = load(&[
            (DATABASE_URL, "postgres://localhost/catalog"),
            (RETRY_TYPE, "aggressive"),
            (RETRY_MAX_RETRIES, "9"),
            (RETRY_INITIAL_INTERVAL_MS, "250"),
            (RETRY_MULTIPLIER, "1.25"),
        ])
        .unwrap();

        let retry = &config.consumer.retry;
        assert_eq!(retry.preset, RetryPreset::Aggressive);
        assert_eq!(retry.max_retries, Some(9));
        assert_eq!(retry.initial_interval, Some(Duration::from_millis(250)));
        assert_eq!(retry.multiplier, Some(1.25));
        assert_eq!(retry.max_interval, None);

        let resolved = retry.resolve();
        assert_eq!(resolved.max_retries, 9);
        assert_eq!(resolved.max_interval, Duration::from_secs(10));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = load(&[
            (DATABASE_URL, "postgres://localhost/catalog"),
            (CONSUMER_POLL_INTERVAL_MS, "soon"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: CONSUMER_POLL_INTERVAL_MS, ref value, .. } if value == "soon"
        ));

        let err = load(&[
            (DATABASE_URL, "postgres://localhost/catalog"),
            (USER_GRPC_ADDR, "localhost"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: USER_GRPC_ADDR, .. }));
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        let config = load(&[
            (DATABASE_URL, "postgres://localhost/catalog"),
            (LOG_FORMAT, "JSON"),
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        assert!(matches!(
            load(&[(DATABASE_URL, "x"), (LOG_FORMAT, "xml")]),
            Err(ConfigError::Invalid { key: LOG_FORMAT, .. })
        ));
    }
}
