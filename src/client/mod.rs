//! Brokerage Clients
//!
//! Traits separating market data access from order routing, plus the
//! broker-facing domain types shared by both.

pub mod alpaca;
mod types;

pub use alpaca::{AlpacaClient, ASSET_EXCHANGES};
pub use types::{
    Account, AccountStatus, Asset, AssetStatus, Bar, DataRequest, OrderRequest, OrderResponse,
    OrderSide, OrderType, Position, PositionSide, Quote, RawDataset, Record, TimeInForce, Trade,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Historical and latest market data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataClient: Send + Sync {
    /// All known assets keyed by symbol
    async fn symbols(&self) -> Result<Arc<HashMap<String, Asset>>>;

    /// Raw records for every requested symbol, following pagination to the end
    async fn get_market_data(&self, request: &DataRequest) -> Result<RawDataset>;
}

/// Account state and order routing
#[async_trait]
pub trait TradeClient: Send + Sync {
    async fn account(&self) -> Result<Account>;

    async fn positions(&self) -> Result<Vec<Position>>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse>;

    /// Cash available to the trader; negative when on margin
    async fn cash(&self) -> Result<Decimal> {
        Ok(self.account().await?.cash)
    }

    /// Total account value
    async fn net_worth(&self) -> Result<Decimal> {
        Ok(self.account().await?.portfolio_value)
    }

    /// Market value of long positions
    async fn longs(&self) -> Result<Decimal> {
        Ok(self.account().await?.long_market_value)
    }

    /// Absolute market value of short positions
    async fn shorts(&self) -> Result<Decimal> {
        Ok(self.account().await?.short_market_value.abs())
    }

    /// Signed quantities in the order of `symbols`; shorts are negative
    async fn asset_quantities(&self, symbols: &[String]) -> Result<Vec<Decimal>> {
        let positions = self.positions().await?;
        let held: HashMap<&str, Decimal> = positions
            .iter()
            .map(|p| (p.symbol.as_str(), p.signed_qty()))
            .collect();

        Ok(symbols
            .iter()
            .map(|s| held.get(s.as_str()).copied().unwrap_or(Decimal::ZERO))
            .collect())
    }

    /// True when the account is active
    async fn check_connection(&self) -> Result<bool> {
        Ok(self.account().await?.status == AccountStatus::Active)
    }
}
