use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_ip_list_env, parse_list_env, parse_u32_env, parse_u64_env,
};
use crate::llm::RetryPolicy;
use crate::throttle::ThrottleConfig;
use crate::timezone::normalize_time_zone;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BOOKS_PATH: &str = "data/books.json";
const DEFAULT_PORTFOLIO_PATH: &str = "data/portfolio.json";
const DEFAULT_QUOTA_TIME_ZONE: &str = "America/Los_Angeles";
const DEFAULT_RATE_REFILL_MS: u64 = 1_000;
const DEFAULT_RATE_BURST: u32 = 3;
const DEFAULT_DAILY_QUOTA: u64 = 500;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_STEP_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub books_path: PathBuf,
    pub portfolio_path: PathBuf,
    pub signatures_path: Option<PathBuf>,
    pub allowed_origins: Vec<String>,
    pub trusted_proxy_ips: Vec<IpAddr>,
    pub throttle: ThrottleConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let quota_time_zone = optional_trimmed_env("CHAT_QUOTA_TIME_ZONE")
            .unwrap_or_else(|| DEFAULT_QUOTA_TIME_ZONE.to_string());
        let quota_time_zone = normalize_time_zone(&quota_time_zone).ok_or_else(|| {
            ConfigError::InvalidConfiguration(format!(
                "CHAT_QUOTA_TIME_ZONE '{quota_time_zone}' is not a known IANA time zone"
            ))
        })?;

        let refill_ms = parse_u64_env("CHAT_RATE_REFILL_MS", DEFAULT_RATE_REFILL_MS)?;
        let burst = parse_u32_env("CHAT_RATE_BURST", DEFAULT_RATE_BURST)?;
        if refill_ms == 0 || burst == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "CHAT_RATE_REFILL_MS and CHAT_RATE_BURST must be greater than zero".to_string(),
            ));
        }

        let config = Self {
            bind_addr: optional_trimmed_env("CHAT_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            books_path: optional_trimmed_env("BOOKS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BOOKS_PATH)),
            portfolio_path: optional_trimmed_env("PORTFOLIO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PORTFOLIO_PATH)),
            signatures_path: optional_trimmed_env("SIGNATURES_PATH").map(PathBuf::from),
            allowed_origins: parse_list_env("ALLOWED_ORIGINS"),
            trusted_proxy_ips: parse_ip_list_env("TRUSTED_PROXY_IPS")?,
            throttle: ThrottleConfig {
                refill_interval: Duration::from_millis(refill_ms),
                burst,
                daily_limit: parse_u64_env("CHAT_DAILY_QUOTA", DEFAULT_DAILY_QUOTA)?,
                quota_time_zone,
            },
            retry: RetryPolicy {
                attempt_timeout: Duration::from_millis(parse_u64_env(
                    "CHAT_ATTEMPT_TIMEOUT_MS",
                    DEFAULT_ATTEMPT_TIMEOUT_MS,
                )?),
                max_retries: parse_u32_env("CHAT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                backoff_step: Duration::from_millis(parse_u64_env(
                    "CHAT_RETRY_STEP_MS",
                    DEFAULT_RETRY_STEP_MS,
                )?),
                overall_deadline: None,
            },
        };

        Ok(config)
    }
}

/// Loads `.env` from the working directory when present. A missing file is not an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}
