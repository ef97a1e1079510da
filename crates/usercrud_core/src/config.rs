//! Process configuration from environment variables.
//!
//! # Responsibility
//! - Load storage and logging settings for the service binary.
//! - Optionally seed the environment from an env file first.
//!
//! # Invariants
//! - All missing required variables are reported together.
//! - Values already present in the environment win over the env file.

use crate::db::PoolOptions;
use crate::logging::default_log_level;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB_PATH: &str = "USERS_DB_PATH";
pub const ENV_LOG_DIR: &str = "USERS_LOG_DIR";
pub const ENV_LOG_LEVEL: &str = "USERS_LOG_LEVEL";
pub const ENV_POOL_SIZE: &str = "USERS_POOL_SIZE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "USERS_BUSY_TIMEOUT_MS";

const REQUIRED_VARS: &[&str] = &[ENV_DB_PATH, ENV_LOG_DIR];
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration loading errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required variables are unset or blank.
    MissingVars(Vec<String>),
    /// A variable is set but cannot be parsed.
    InvalidValue { key: &'static str, value: String },
    /// The env file exists but could not be read.
    EnvFile(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingVars(vars) => write!(f, "missing env variables: [{}]", vars.join(", ")),
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
            Self::EnvFile(message) => write!(f, "failed to load env file: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Settings for the user store process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_dir: String,
    pub log_level: String,
    pub pool_size: usize,
    pub busy_timeout: Duration,
}

impl AppConfig {
    /// Loads `env_file` when it exists, then reads the process environment.
    pub fn load(env_file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let env_file = env_file.as_ref();
        if env_file.exists() {
            dotenv::from_path(env_file).map_err(|err| ConfigError::EnvFile(err.to_string()))?;
        }
        Self::from_env()
    }

    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, so callers and tests can supply
    /// values without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let missing = REQUIRED_VARS
            .iter()
            .filter(|key| value(**key).is_none())
            .map(|key| (*key).to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let pool_size = match value(ENV_POOL_SIZE) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_POOL_SIZE,
                        value: raw,
                    })
                }
            },
            None => DEFAULT_POOL_SIZE,
        };

        let busy_timeout_ms = match value(ENV_BUSY_TIMEOUT_MS) {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_BUSY_TIMEOUT_MS,
                value: raw,
            })?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Self {
            db_path: PathBuf::from(value(ENV_DB_PATH).unwrap_or_default()),
            log_dir: value(ENV_LOG_DIR).unwrap_or_default(),
            log_level: value(ENV_LOG_LEVEL).unwrap_or_else(|| default_log_level().to_string()),
            pool_size,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }

    /// Pool options derived from this configuration.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.pool_size,
            busy_timeout: self.busy_timeout,
            ..PoolOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError};
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn reports_every_missing_variable() {
        let err = AppConfig::from_lookup(lookup(&[("USERS_DB_PATH", "  ")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingVars(vec![
                "USERS_DB_PATH".to_string(),
                "USERS_LOG_DIR".to_string()
            ])
        );
        assert_eq!(
            err.to_string(),
            "missing env variables: [USERS_DB_PATH, USERS_LOG_DIR]"
        );
    }

    #[test]
    fn applies_defaults_for_optional_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("USERS_DB_PATH", "/var/lib/users.db"),
            ("USERS_LOG_DIR", "/var/log/users"),
        ]))
        .unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.busy_timeout, Duration::from_millis(5_000));
        assert_eq!(config.pool_options().max_size, 4);
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = AppConfig::from_lookup(lookup(&[
            ("USERS_DB_PATH", "/var/lib/users.db"),
            ("USERS_LOG_DIR", "/var/log/users"),
            ("USERS_POOL_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "USERS_POOL_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn load_reads_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("test.env");
        std::fs::write(
            &env_file,
            "USERS_DB_PATH=/tmp/usercrud-config-test.db\nUSERS_LOG_DIR=/tmp/usercrud-logs\nUSERS_BUSY_TIMEOUT_MS=250\n",
        )
        .unwrap();

        let config = AppConfig::load(&env_file).unwrap();
        assert_eq!(
            config.db_path.to_str(),
            Some("/tmp/usercrud-config-test.db")
        );
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }
}
