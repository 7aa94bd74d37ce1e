//! Configuration management for the agent.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use fieldsync_engine::{backoff::DEFAULT_MAX_RETRIES, Backoff};

use crate::sync::{EvidencePolicy, SyncOptions};

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Status surface host address
    pub host: String,
    /// Status surface port
    pub port: u16,
    /// SQLite connection URL for the local store
    pub database_url: String,
    /// Base URL of the remote delivery API
    pub api_base_url: String,
    /// Bearer token for the remote API
    pub api_token: Option<String>,
    /// Periodic resync interval
    pub sync_interval: Duration,
    /// Failed attempts before an operation is moved to the conflict log
    pub max_retries: u32,
    /// Device storage ceiling for the local store
    pub storage_limit_bytes: u64,
    /// Timeout for a single remote call
    pub request_timeout: Duration,
    /// Connectivity probe interval; `None` disables the probe
    pub probe_interval: Option<Duration>,
    pub evidence_policy: EvidencePolicy,
    pub location_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "7878".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://fieldsync.db?mode=rwc".to_string());

        let api_base_url = env::var("API_BASE_URL").map_err(|_| ConfigError::MissingApiBaseUrl)?;

        let api_token = env::var("API_TOKEN").ok().filter(|t| !t.is_empty());

        let sync_interval = Duration::from_secs(parse_var("SYNC_INTERVAL_SECS", 30)?);
        if sync_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "SYNC_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        let max_retries = parse_var("MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        let storage_limit_bytes = parse_var("STORAGE_LIMIT_BYTES", 512 * 1024 * 1024)?;
        let request_timeout = Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 20)?);

        let probe_secs: u64 = parse_var("PROBE_INTERVAL_SECS", 15)?;
        let probe_interval = (probe_secs > 0).then(|| Duration::from_secs(probe_secs));

        let evidence_policy = parse_var("EVIDENCE_POLICY", EvidencePolicy::Require)?;
        let location_batch_size = parse_var("LOCATION_BATCH_SIZE", 200)?;

        Ok(Self {
            host,
            port,
            database_url,
            api_base_url,
            api_token,
            sync_interval,
            max_retries,
            storage_limit_bytes,
            request_timeout,
            probe_interval,
            evidence_policy,
            location_batch_size,
        })
    }

    /// Options for the sync engine context.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            interval: self.sync_interval,
            backoff: Backoff::default().with_max_retries(self.max_retries),
            evidence_policy: self.evidence_policy,
            location_batch_size: self.location_batch_size.max(1),
            probe_interval: self.probe_interval,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API_BASE_URL environment variable is required")]
    MissingApiBaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
