//! Live trading
//!
//! Connects a trained agent to a brokerage account: account state and the
//! market data stream go in, market orders come out.

pub mod rules;
pub mod trader;

pub use rules::{
    check_trade_constraints, no_margin, no_short, order_quantity, NoRules, TradingRules,
    MAINTENANCE_MARGIN, PATTERN_DAY_TRADER_MINIMUM_EQUITY,
};
pub use trader::Trader;
