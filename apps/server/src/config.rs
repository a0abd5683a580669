//! Environment configuration for the sync agent.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_url: String,
    pub api_token: Option<String>,
    pub data_dir: String,
    pub store: StoreKind,
    pub store_quota_bytes: Option<u64>,
    pub request_timeout: Duration,
    pub transport_max_attempts: usize,
    /// `None` disables the periodic sweep.
    pub auto_sync_interval: Option<Duration>,
    pub network_online: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 4780,
            api_url: "http://localhost:8000".to_string(),
            api_token: None,
            data_dir: "./data".to_string(),
            store: StoreKind::Sqlite,
            store_quota_bytes: None,
            request_timeout: Duration::from_secs(30),
            transport_max_attempts: 3,
            auto_sync_interval: Some(Duration::from_secs(45)),
            network_online: true,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(None),
    }
}

fn parse_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid { name, value }),
        },
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let auto_sync_interval = match parse_var::<u64>("MARKSYNC_AUTO_SYNC_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.auto_sync_interval,
        };

        Ok(Config {
            host: env::var("MARKSYNC_HOST").unwrap_or(defaults.host),
            port: parse_var("MARKSYNC_PORT")?.unwrap_or(defaults.port),
            api_url: env::var("MARKSYNC_API_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.api_url),
            api_token: env::var("MARKSYNC_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            data_dir: env::var("MARKSYNC_DATA_DIR").unwrap_or(defaults.data_dir),
            store: parse_var("MARKSYNC_STORE")?.unwrap_or(defaults.store),
            store_quota_bytes: parse_var("MARKSYNC_STORE_QUOTA_BYTES")?,
            request_timeout: parse_var::<u64>("MARKSYNC_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            transport_max_attempts: parse_var("MARKSYNC_TRANSPORT_MAX_ATTEMPTS")?
                .unwrap_or(defaults.transport_max_attempts),
            auto_sync_interval,
            network_online: parse_bool("MARKSYNC_NETWORK_ONLINE")?
                .unwrap_or(defaults.network_online),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
