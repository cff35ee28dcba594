use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{NeuralError, Result};

pub const DEFAULT_TRADING_URL: &str = "https://api.alpaca.markets";
pub const DEFAULT_PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub alpaca: AlpacaConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaConfig {
    /// REST endpoint for account, assets and orders
    pub trading_url: String,
    /// REST endpoint for historical market data
    pub data_url: String,
    /// API key (falls back to ALPACA_API_KEY)
    #[serde(default)]
    pub key: Option<String>,
    /// API secret (falls back to ALPACA_API_SECRET)
    #[serde(default)]
    pub secret: Option<String>,
    /// Stock data feed ("iex" or "sip")
    #[serde(default = "default_stock_feed")]
    pub stock_feed: String,
    /// Maximum records per page on data endpoints
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

fn default_stock_feed() -> String {
    "iex".to_string()
}

fn default_page_limit() -> u32 {
    10_000
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            trading_url: DEFAULT_TRADING_URL.to_string(),
            data_url: DEFAULT_DATA_URL.to_string(),
            key: None,
            secret: None,
            stock_feed: default_stock_feed(),
            page_limit: default_page_limit(),
        }
    }
}

impl AlpacaConfig {
    /// Resolve key and secret from config, then from the OS environment.
    pub fn credentials(&self) -> Result<(String, String)> {
        let key = self
            .key
            .clone()
            .or_else(|| std::env::var("ALPACA_API_KEY").ok());
        let secret = self
            .secret
            .clone()
            .or_else(|| std::env::var("ALPACA_API_SECRET").ok());

        match (key, secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok((key, secret))
            }
            _ => Err(NeuralError::Auth(
                "Alpaca API secret and key not set up in OS environment".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Directory holding downloaded datasets
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./datasets")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Decimal places kept when converting notional to quantity
    #[serde(default = "default_quantity_precision")]
    pub quantity_precision: u32,
    /// Minimum cash / net worth before buys are nullified
    #[serde(default = "default_cash_ratio_threshold")]
    pub cash_ratio_threshold: f64,
    /// Time in force for submitted orders
    #[serde(default = "default_time_in_force")]
    pub time_in_force: String,
    /// Allow orders that open short positions
    #[serde(default)]
    pub allow_short: bool,
    /// Allow buys when cash runs low
    #[serde(default)]
    pub allow_margin: bool,
}

fn default_quantity_precision() -> u32 {
    5
}

fn default_cash_ratio_threshold() -> f64 {
    0.1
}

fn default_time_in_force() -> String {
    "ioc".to_string()
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            quantity_precision: default_quantity_precision(),
            cash_ratio_threshold: default_cash_ratio_threshold(),
            time_in_force: default_time_in_force(),
            allow_short: false,
            allow_margin: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info,neural=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("alpaca.trading_url", DEFAULT_TRADING_URL)?
            .set_default("alpaca.data_url", DEFAULT_DATA_URL)?
            .set_default("alpaca.stock_feed", "iex")?
            .set_default("alpaca.page_limit", 10_000)?
            .set_default("logging.level", "info,neural=debug")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("NEURAL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (NEURAL_ALPACA__KEY, etc.)
            .add_source(
                Environment::with_prefix("NEURAL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration for paper trading with everything else at defaults
    pub fn paper() -> Self {
        Self {
            alpaca: AlpacaConfig {
                trading_url: DEFAULT_PAPER_TRADING_URL.to_string(),
                ..AlpacaConfig::default()
            },
            data: DataConfig::default(),
            trade: TradeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
