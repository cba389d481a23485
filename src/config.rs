use crate::domain::Decimal;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub oracle_api_url: String,
    /// Currency all balances and PnL are displayed in.
    pub display_currency: String,
    /// Virtual balance granted to new accounts and after a bankruptcy reset.
    pub seed_balance: Decimal,
    pub monitor_interval_ms: u64,
    pub oracle_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let oracle_api_url = env_map
            .get("ORACLE_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("ORACLE_API_URL".to_string()))?;

        let display_currency = env_map
            .get("DISPLAY_CURRENCY")
            .cloned()
            .unwrap_or_else(|| "USDT".to_string());

        let seed_balance = env_map
            .get("SEED_BALANCE")
            .map(|s| s.as_str())
            .unwrap_or("10000")
            .parse::<Decimal>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "SEED_BALANCE".to_string(),
                    "must be a valid decimal".to_string(),
                )
            })?;
        if !seed_balance.is_positive() {
            return Err(ConfigError::InvalidValue(
                "SEED_BALANCE".to_string(),
                "must be > 0".to_string(),
            ));
        }

        let monitor_interval_ms = env_map
            .get("MONITOR_INTERVAL_MS")
            .map(|s| s.as_str())
            .unwrap_or("1000")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "MONITOR_INTERVAL_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let oracle_timeout_ms = env_map
            .get("ORACLE_TIMEOUT_MS")
            .map(|s| s.as_str())
            .unwrap_or("5000")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "ORACLE_TIMEOUT_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        Ok(Config {
            port,
            database_path,
            oracle_api_url,
            display_currency,
            seed_balance,
            monitor_interval_ms,
            oracle_timeout_ms,
        })
    }
}
