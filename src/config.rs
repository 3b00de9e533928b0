//! Configuration management for the Course Sync server

use serde::Deserialize;
use std::env;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    /// `user:token` pairs, comma separated
    pub tokens: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on concurrent remote operations within one cascade
    pub max_concurrency: usize,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./course-sync.db".to_string(),
            },
            remote: RemoteConfig {
                base_url: "http://localhost:8000".to_string(),
                tokens: String::new(),
                timeout_secs: 30,
            },
            sync: SyncConfig { max_concurrency: 8 },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or(&lookup, "SERVER_PORT", defaults.server.port)?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            remote: RemoteConfig {
                base_url: lookup("REMOTE_BASE_URL").ok_or(ConfigError::Missing("REMOTE_BASE_URL"))?,
                tokens: lookup("REMOTE_TOKENS").unwrap_or_default(),
                timeout_secs: parse_or(&lookup, "REMOTE_TIMEOUT_SECS", defaults.remote.timeout_secs)?,
            },
            sync: SyncConfig {
                max_concurrency: match parse_or(&lookup, "SYNC_MAX_CONCURRENCY", defaults.sync.max_concurrency)? {
                    0 => {
                        return Err(ConfigError::Invalid {
                            key: "SYNC_MAX_CONCURRENCY",
                            value: "0".to_string(),
                        })
                    }
                    n => n,
                },
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
