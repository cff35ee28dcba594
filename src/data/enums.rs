//! Dataset Enumerations
//!
//! Dataset kinds, asset classes and accepted sampling resolutions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::calendar::CalendarType;
use crate::error::{NeuralError, Result};

/// Kind of market data a dataset is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetType {
    Bar,
    Quote,
    Trade,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bars",
            Self::Quote => "quotes",
            Self::Trade => "trades",
        }
    }

    /// Numeric fields kept per symbol, in column order
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::Bar => &[
                "open",
                "high",
                "low",
                "close",
                "volume",
                "trade_count",
                "vwap",
            ],
            Self::Quote => &["bid_price", "bid_size", "ask_price", "ask_size"],
            Self::Trade => &["price", "size"],
        }
    }
}

impl std::fmt::Display for DatasetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = NeuralError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar" | "bars" => Ok(Self::Bar),
            "quote" | "quotes" => Ok(Self::Quote),
            "trade" | "trades" => Ok(Self::Trade),
            other => Err(NeuralError::validation(format!(
                "invalid dataset type '{}'; expected bar|quote|trade",
                other
            ))),
        }
    }
}

/// Asset class as reported by the trading API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    UsEquity,
    Crypto,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsEquity => "us_equity",
            Self::Crypto => "crypto",
        }
    }

    pub fn all() -> &'static [AssetClass] {
        &[Self::UsEquity, Self::Crypto]
    }

    /// Trading calendar the asset class follows
    pub fn calendar_type(&self) -> CalendarType {
        match self {
            Self::UsEquity => CalendarType::NewYorkStockExchange,
            Self::Crypto => CalendarType::TwentyFourSeven,
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = NeuralError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "us_equity" | "equity" | "stock" | "stocks" => Ok(Self::UsEquity),
            "crypto" => Ok(Self::Crypto),
            other => Err(NeuralError::validation(format!(
                "invalid asset class '{}'; expected us_equity|crypto",
                other
            ))),
        }
    }
}

/// Sampling resolution of a feature dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1Min")]
    OneMinute,
    #[serde(rename = "5Min")]
    FiveMinutes,
    #[serde(rename = "15Min")]
    FifteenMinutes,
    #[serde(rename = "30Min")]
    ThirtyMinutes,
}

impl Resolution {
    pub const ACCEPTED: [&'static str; 4] = ["1Min", "5Min", "15Min", "30Min"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1Min",
            Self::FiveMinutes => "5Min",
            Self::FifteenMinutes => "15Min",
            Self::ThirtyMinutes => "30Min",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = NeuralError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "1Min" => Ok(Self::OneMinute),
            "5Min" => Ok(Self::FiveMinutes),
            "15Min" => Ok(Self::FifteenMinutes),
            "30Min" => Ok(Self::ThirtyMinutes),
            _ => Err(NeuralError::validation(format!(
                "Accepted resolutions: {:?}.",
                Self::ACCEPTED
            ))),
        }
    }
}
