//! Environment configuration and logging setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::ConfigError;
use crate::models::ArenaSettings;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Install the global subscriber. `RUST_LOG` wins over `level`.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_path: PathBuf,
    pub logging: LoggingConfig,
    /// Value of `x-admin-token` that grants admin rights; no admin when unset
    pub admin_token: Option<String>,
    /// Settings for arenas that were never configured explicitly
    pub arena_defaults: ArenaSettings,
    pub notify_webhook_url: Option<String>,
    pub sentiment_webhook_url: Option<String>,
    pub hidden_market_watchers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            data_path: PathBuf::from("data/state.json"),
            logging: LoggingConfig::default(),
            admin_token: None,
            arena_defaults: ArenaSettings::default(),
            notify_webhook_url: None,
            sentiment_webhook_url: None,
            hidden_market_watchers: Vec::new(),
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", &addr)?;
        }
        if let Some(path) = get("DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }
        if let Some(level) = get("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = get("LOG_FORMAT") {
            config.logging.format = format.to_lowercase();
        }
        config.admin_token = get("ADMIN_TOKEN");

        if let Some(fee) = get("DEFAULT_FEE_PERCENT") {
            let fee_percent: Decimal = parse("DEFAULT_FEE_PERCENT", &fee)?;
            if fee_percent < Decimal::ZERO || fee_percent >= Decimal::ONE {
                return Err(ConfigError::Invalid {
                    var: "DEFAULT_FEE_PERCENT",
                    value: fee,
                    reason: "must satisfy 0 <= fee < 1".into(),
                });
            }
            config.arena_defaults.fee_percent = fee_percent;
        }
        if let Some(flag) = get("LIMIT_MULTIPLE_BETS") {
            config.arena_defaults.limit_multiple_bets = matches!(flag.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(threshold) = get("MULTIPLE_BET_THRESHOLD") {
            config.arena_defaults.multiple_bet_threshold = parse("MULTIPLE_BET_THRESHOLD", &threshold)?;
        }

        config.notify_webhook_url = get("NOTIFY_WEBHOOK_URL");
        config.sentiment_webhook_url = get("SENTIMENT_WEBHOOK_URL");
        config.hidden_market_watchers = get("HIDDEN_MARKET_WATCHERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(config)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 1234);
        assert_eq!(config.data_path, PathBuf::from("data/state.json"));
        assert_eq!(config.arena_defaults, ArenaSettings::default());
        assert!(config.admin_token.is_none());
        assert!(config.hidden_market_watchers.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("LOG_FORMAT", "JSON"),
            ("ADMIN_TOKEN", "secret"),
            ("DEFAULT_FEE_PERCENT", "0.05"),
            ("LIMIT_MULTIPLE_BETS", "true"),
            ("MULTIPLE_BET_THRESHOLD", "3"),
            ("HIDDEN_MARKET_WATCHERS", "mod1, mod2,,"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.arena_defaults.fee_percent, dec!(0.05));
        assert!(config.arena_defaults.limit_multiple_bets);
        assert_eq!(config.arena_defaults.multiple_bet_threshold, 3);
        assert_eq!(config.hidden_market_watchers, vec!["mod1", "mod2"]);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config_from(&[("DEFAULT_FEE_PERCENT", "1")]).is_err());
        assert!(config_from(&[("DEFAULT_FEE_PERCENT", "-0.1")]).is_err());
        assert!(config_from(&[("MULTIPLE_BET_THRESHOLD", "many")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "nowhere")]).is_err());
    }
}
