//! Configuration management.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `main` loads `.env` through `dotenvy` before calling [`Config::from_env`].

use crate::app::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// What was expected
        reason: &'static str,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Public scheme and host that verification URLs point at
    pub public_origin: String,
    /// `PostgreSQL` settings; `None` selects the in-memory repository
    pub database: Option<DatabaseConfig>,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
    /// Owners kept in the pass listing cache
    pub cache_capacity: usize,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to a value that
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database = match var("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
                connect_timeout: parse(&var, "DATABASE_CONNECT_TIMEOUT", 5)?,
            }),
            None => None,
        };

        Ok(Self {
            public_origin: var("PUBLIC_ORIGIN")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            database,
            server: ServerConfig {
                host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse(&var, "PORT", 8080)?,
                request_timeout: parse(&var, "REQUEST_TIMEOUT_SECS", 10)?,
                shutdown_timeout: parse(&var, "SHUTDOWN_TIMEOUT", 30)?,
            },
            metrics_enabled: parse_bool(&var, "METRICS_ENABLED", true)?,
            cache_capacity: parse(&var, "PASS_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?,
        })
    }

    /// Address the HTTP server binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerConfig {
    /// Per-request timeout
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Grace period for in-flight requests on shutdown
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

impl DatabaseConfig {
    /// Pool connection timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

fn parse<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: key,
            value,
            reason: "expected a non-negative integer",
        }),
        None => Ok(default),
    }
}

fn parse_bool<F>(var: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var: key,
                value,
                reason: "expected true or false",
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_select_in_memory_storage() {
        let config = load(&[]).unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.public_origin, "http://localhost:8080");
        assert!(config.metrics_enabled);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn database_url_enables_postgres() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/passgate"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        let database = config.database.unwrap();
        assert_eq!(load(&[("PASS_CACHE_CAPACITY", "500")]).unwrap().cache_capacity, 500);
        assert_eq!(database.max_connections, 4);
        assert_eq!(database.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("PORT", "  "), ("DATABASE_URL", "")]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.database.is_none());
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "PORT",
                value: "eighty".to_string(),
                reason: "expected a non-negative integer",
            }
        );

        assert!(load(&[("METRICS_ENABLED", "maybe")]).is_err());
        assert!(!load(&[("METRICS_ENABLED", "off")]).unwrap().metrics_enabled);
    }
}
