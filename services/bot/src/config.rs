//! services/bot/src/config.rs
//!
//! Defines the bot's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use pdfbot_core::validation::DEFAULT_MAX_FILE_SIZE;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub public_key: String,
    pub api_url: String,
    pub staging_dir: PathBuf,
    pub max_file_size: u64,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub max_concurrent_jobs: usize,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Required secrets ---
        let bot_token = required(&lookup, "BOT_TOKEN")?;
        let public_key = required(&lookup, "PUBLIC_KEY")?;

        // --- Backend and staging ---
        let api_url = lookup("ILOVEPDF_API_URL")
            .unwrap_or_else(|| "https://api.ilovepdf.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let staging_dir = lookup("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./tmp"));

        // --- Limits and timeouts ---
        let max_file_size = parsed(&lookup, "MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?;
        let job_timeout = Duration::from_secs(parsed(&lookup, "JOB_TIMEOUT_SECS", 300)?);
        let poll_interval = Duration::from_millis(parsed(&lookup, "POLL_INTERVAL_MS", 1000)?);
        let http_timeout = Duration::from_secs(parsed(&lookup, "HTTP_TIMEOUT_SECS", 120)?);
        let max_concurrent_jobs = parsed(&lookup, "MAX_CONCURRENT_JOBS", 4usize)?;
        if max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_JOBS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bot_token,
            public_key,
            api_url,
            staging_dir,
            max_file_size,
            job_timeout,
            poll_interval,
            http_timeout,
            max_concurrent_jobs,
            log_level,
        })
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}
