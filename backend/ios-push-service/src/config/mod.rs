use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use apns_gateway::{Environment, DEFAULT_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::services::push_dispatcher::DEFAULT_MAX_ATTEMPTS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub apns: ApnsConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApnsConfig {
    /// Use the sandbox gateway instead of production
    pub sandbox: bool,
    /// Sliding idle expiration of cached sessions in seconds (default: 1200)
    pub connection_idle_secs: u64,
    /// Wait for trailing error frames after a send in seconds (default: 1)
    pub read_tail_timeout_secs: u64,
    /// Whole-request timeout for APNs sends, handshake included (default: 20)
    pub request_timeout_secs: u64,
    /// Send attempts per push, including the first (default: 3)
    pub max_attempts: u32,
    /// First delay before resubscribing to rotation events (default: 500)
    pub resubscribe_backoff_ms: u64,
    /// Upper bound for the resubscribe delay (default: 30000)
    pub resubscribe_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Pub/Sub channel carrying certificate rotation events
    pub rotation_channel: String,
}

impl ApnsConfig {
    pub fn environment(&self) -> Environment {
        Environment::from_sandbox_flag(self.sandbox)
    }

    pub fn connection_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_idle_secs)
    }

    pub fn read_tail_timeout(&self) -> Duration {
        Duration::from_secs(self.read_tail_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_ms)
    }

    pub fn resubscribe_backoff_max(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_max_ms)
    }
}

impl Config {
    /// Load from the process environment, after reading `.env` if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Config {
            apns: ApnsConfig {
                sandbox: parse_bool(&lookup, "APNS_SANDBOX", false)?,
                connection_idle_secs: parse_or(&lookup, "APNS_CONNECTION_IDLE_SECS", 1200)?,
                read_tail_timeout_secs: parse_or(&lookup, "APNS_READ_TAIL_TIMEOUT_SECS", 1)?,
                request_timeout_secs: parse_or(
                    &lookup,
                    "APNS_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT.as_secs(),
                )?,
                max_attempts: parse_or(&lookup, "APNS_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                resubscribe_backoff_ms: parse_or(&lookup, "APNS_RESUBSCRIBE_BACKOFF_MS", 500)?,
                resubscribe_backoff_max_ms: parse_or(
                    &lookup,
                    "APNS_RESUBSCRIBE_BACKOFF_MAX_MS",
                    30_000,
                )?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
                rotation_channel: lookup("APNS_ROTATION_CHANNEL")
                    .unwrap_or_else(|| credential_rotation::DEFAULT_CHANNEL.to_string()),
            },
        };

        if config.apns.max_attempts == 0 {
            bail!("APNS_MAX_ATTEMPTS must be at least 1");
        }
        if config.apns.resubscribe_backoff_ms == 0 {
            bail!("APNS_RESUBSCRIBE_BACKOFF_MS must be greater than 0");
        }
        if config.apns.resubscribe_backoff_max_ms < config.apns.resubscribe_backoff_ms {
            bail!("APNS_RESUBSCRIBE_BACKOFF_MAX_MS must not be below APNS_RESUBSCRIBE_BACKOFF_MS");
        }

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("FALSE") | Some("no") => Ok(false),
        Some(other) => bail!("invalid value for {key}: {other:?}"),
    }
}
