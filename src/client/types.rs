use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::data::{AssetClass, DatasetType, Resolution};

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Onboarding,
    SubmissionFailed,
    Submitted,
    AccountUpdated,
    ApprovalPending,
    Active,
    Rejected,
    #[serde(other)]
    Other,
}

/// Brokerage account summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub currency: Option<String>,
    pub cash: Decimal,
    pub portfolio_value: Decimal,
    #[serde(default)]
    pub equity: Decimal,
    #[serde(default)]
    pub long_market_value: Decimal,
    /// Reported as a negative value by the broker
    #[serde(default)]
    pub short_market_value: Decimal,
    #[serde(default)]
    pub buying_power: Decimal,
    #[serde(default)]
    pub pattern_day_trader: bool,
}

/// Asset status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Active,
    Inactive,
}

/// Tradable instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "class")]
    pub asset_class: AssetClass,
    pub exchange: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: AssetStatus,
    pub tradable: bool,
    #[serde(default)]
    pub marginable: bool,
    #[serde(default)]
    pub shortable: bool,
    #[serde(default)]
    pub easy_to_borrow: bool,
    #[serde(default)]
    pub fractionable: bool,
}

/// Position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// Open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub side: PositionSide,
    #[serde(default)]
    pub market_value: Option<Decimal>,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub avg_entry_price: Option<Decimal>,
}

impl Position {
    /// Quantity with shorts negative regardless of how the broker signs `qty`
    pub fn signed_qty(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.qty.abs(),
            PositionSide::Short => -self.qty.abs(),
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    /// Good Till Cancelled
    Gtc,
    /// At the opening auction
    Opg,
    /// Immediate Or Cancel
    Ioc,
    /// Fill Or Kill
    Fok,
}

impl std::str::FromStr for TimeInForce {
    type Err = crate::error::NeuralError;

    fn from_str(raw: &str) -> crate::error::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "gtc" => Ok(Self::Gtc),
            "opg" => Ok(Self::Opg),
            "ioc" => Ok(Self::Ioc),
            "fok" => Ok(Self::Fok),
            other => Err(crate::error::NeuralError::validation(format!(
                "invalid time in force '{}'",
                other
            ))),
        }
    }
}

/// Order request (what we want to do)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Market order; the sign of `quantity` picks the side
    pub fn market(symbol: impl Into<String>, quantity: Decimal, time_in_force: TimeInForce) -> Self {
        let side = if quantity.is_sign_negative() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };

        Self {
            symbol: symbol.into(),
            qty: quantity.abs(),
            side,
            order_type: OrderType::Market,
            time_in_force,
            limit_price: None,
            stop_price: None,
            client_order_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Order as acknowledged by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub filled_qty: Option<Decimal>,
    pub side: OrderSide,
    pub status: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: f64,
    #[serde(rename = "n", default)]
    pub trade_count: f64,
    #[serde(rename = "vw", default)]
    pub vwap: f64,
}

/// Top of book quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "bp")]
    pub bid_price: f64,
    #[serde(rename = "bs")]
    pub bid_size: f64,
    #[serde(rename = "ap")]
    pub ask_price: f64,
    #[serde(rename = "as")]
    pub ask_size: f64,
}

/// Executed trade print
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s")]
    pub size: f64,
}

/// Timestamped numeric fields in `DatasetType::fields` order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl From<Bar> for Record {
    fn from(bar: Bar) -> Self {
        Self {
            timestamp: bar.timestamp,
            values: vec![
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
                bar.trade_count,
                bar.vwap,
            ],
        }
    }
}

impl From<Quote> for Record {
    fn from(quote: Quote) -> Self {
        Self {
            timestamp: quote.timestamp,
            values: vec![
                quote.bid_price,
                quote.bid_size,
                quote.ask_price,
                quote.ask_size,
            ],
        }
    }
}

impl From<Trade> for Record {
    fn from(trade: Trade) -> Self {
        Self {
            timestamp: trade.timestamp,
            values: vec![trade.price, trade.size],
        }
    }
}

/// Historical data query
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub dataset_type: DatasetType,
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
    /// Bar timeframe; ignored for quotes and trades
    pub resolution: Resolution,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Records per symbol as returned by the data API, sorted by time
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub records: BTreeMap<String, Vec<Record>>,
}

impl RawDataset {
    pub fn is_empty(&self) -> bool {
        self.records.values().all(|r| r.is_empty())
    }

    /// Symbols with at least one record
    pub fn symbols(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn extend(&mut self, symbol: String, records: Vec<Record>) {
        self.records.entry(symbol).or_default().extend(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn account_parses_string_decimals() {
        let json = serde_json::json!({
            "id": "abc",
            "status": "ACTIVE",
            "cash": "1000.50",
            "portfolio_value": "2500",
            "long_market_value": "1700",
            "short_market_value": "-200.5",
            "pattern_day_trader": true,
            "crypto_status": "ACTIVE"
        });
        let account: Account = serde_json::from_value(json).unwrap();
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.cash, dec!(1000.50));
        assert_eq!(account.short_market_value, dec!(-200.5));
        assert!(account.pattern_day_trader);
    }

    #[test]
    fn unknown_account_status_is_other() {
        let json = serde_json::json!({
            "id": "abc",
            "status": "ACCOUNT_CLOSED",
            "cash": "0",
            "portfolio_value": "0"
        });
        let account: Account = serde_json::from_value(json).unwrap();
        assert_eq!(account.status, AccountStatus::Other);
    }

    #[test]
    fn short_positions_are_negative() {
        for raw in ["5", "-5"] {
            let json = serde_json::json!({"symbol": "TSLA", "qty": raw, "side": "short"});
            let position: Position = serde_json::from_value(json).unwrap();
            assert_eq!(position.signed_qty(), dec!(-5));
        }
    }

    #[test]
    fn market_order_side_follows_sign() {
        let order = OrderRequest::market("AAPL", dec!(-1.5), TimeInForce::Ioc);
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.qty, dec!(1.5));

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["type"], "market");
        assert_eq!(json["time_in_force"], "ioc");
        assert!(json.get("limit_price").is_none());
    }

    #[test]
    fn quote_record_keeps_field_order() {
        let json = serde_json::json!({
            "t": "2022-01-03T14:30:00Z", "bp": 1.0, "bs": 2.0, "ap": 3.0, "as": 4.0
        });
        let quote: Quote = serde_json::from_value(json).unwrap();
        let record = Record::from(quote);
        assert_eq!(record.values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(record.values.len(), DatasetType::Quote.fields().len());
    }
}
