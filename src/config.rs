//! Environment-based Configuration
//!
//! All configuration comes from `SWAPD_*` environment variables; secrets are
//! never hardcoded. Validation failures surface before any component starts.
//!
//! # Variables
//!
//! - `SWAPD_NETWORK` - "mainnet", "testnet" or "regtest" (default: "regtest")
//! - `SWAPD_CHAIN_RPC_URL` - chain daemon JSON-RPC endpoint
//! - `SWAPD_CHAIN_RPC_USER` / `SWAPD_CHAIN_RPC_PASSWORD` - RPC credentials
//! - `SWAPD_DB_PATH` - SQLite database path (default: "data/swapd.db")
//! - `SWAPD_LOG_LEVEL` - trace|debug|info|warn|error (default: "info")
//! - `SWAPD_PAYMENT_TIMEOUT_SECS` - Lightning payment ceiling (default: 60)
//! - `SWAPD_PAYMENT_MAX_RETRIES` - path-failure retry budget (default: 3)
//! - `SWAPD_TIMEOUT_DELTA` - blocks between tip and a new swap's timeout
//!   height (default: 144)
//! - `SWAPD_MIN_TIMEOUT_DELTA` - safety floor on the above (default: 20)
//! - `SWAPD_RPC_TIMEOUT_SECS` - upper bound on chain RPC calls (default: 30)

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "SWAPD_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub chain_rpc_url: String,
    pub chain_rpc_user: String,
    pub chain_rpc_password: String,
    pub db_path: String,
    pub log_level: String,
    pub payment_timeout_secs: u64,
    pub payment_max_retries: u32,
    pub timeout_delta: u32,
    pub min_timeout_delta: u32,
    pub rpc_timeout_secs: u64,
}

impl Config {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env_or("SWAPD_NETWORK", "regtest").parse()?;

        let config = Self {
            network,
            chain_rpc_url: require_env("SWAPD_CHAIN_RPC_URL")?,
            chain_rpc_user: env_or("SWAPD_CHAIN_RPC_USER", ""),
            chain_rpc_password: env_or("SWAPD_CHAIN_RPC_PASSWORD", ""),
            db_path: env_or("SWAPD_DB_PATH", "data/swapd.db"),
            log_level: env_or("SWAPD_LOG_LEVEL", "info"),
            payment_timeout_secs: parse_env("SWAPD_PAYMENT_TIMEOUT_SECS", 60)?,
            payment_max_retries: parse_env("SWAPD_PAYMENT_MAX_RETRIES", 3)?,
            timeout_delta: parse_env("SWAPD_TIMEOUT_DELTA", 144)?,
            min_timeout_delta: parse_env("SWAPD_MIN_TIMEOUT_DELTA", 20)?,
            rpc_timeout_secs: parse_env("SWAPD_RPC_TIMEOUT_SECS", 30)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_timeout_delta == 0 {
            return Err(ConfigError::InvalidValue(
                "SWAPD_MIN_TIMEOUT_DELTA".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.timeout_delta <= self.min_timeout_delta {
            return Err(ConfigError::InvalidValue(
                "SWAPD_TIMEOUT_DELTA".to_string(),
                format!(
                    "must exceed the safety floor of {} blocks",
                    self.min_timeout_delta
                ),
            ));
        }
        if self.payment_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SWAPD_PAYMENT_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), value)),
        Err(_) => Ok(default),
    }
}
