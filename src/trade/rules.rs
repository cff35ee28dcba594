//! Order-time safeguards
//!
//! Model actions are notional values computed against a snapshot that may be
//! stale by the time orders reach the broker. These helpers turn notionals
//! into broker-acceptable quantities and filter them against live account
//! state.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::client::{Account, Asset};
use crate::env::MarketSnapshot;
use crate::error::{NeuralError, Result};

/// Equity a pattern day trader must keep to continue day trading
pub const PATTERN_DAY_TRADER_MINIMUM_EQUITY: Decimal = dec!(25000);

/// Borrowed cash may not exceed this multiple of portfolio value
pub const MAINTENANCE_MARGIN: Decimal = dec!(1.00);

/// Rule-based overrides applied to model actions before order placement.
///
/// Implementors can veto or replace the model's notionals, for example to
/// force a liquidation when an external signal fires.
pub trait TradingRules: Send + Sync {
    fn apply_rules(&self, actions: Vec<f64>, _snapshot: &MarketSnapshot) -> Vec<f64> {
        actions
    }
}

/// Passes actions through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRules;

impl TradingRules for NoRules {}

/// Order quantity for one asset.
///
/// Shorts cannot be fractional and positions cannot flip sign in one order,
/// so a crossing trade only closes the held position.
pub fn order_quantity(
    notional: f64,
    price: f64,
    held: Decimal,
    asset: &Asset,
    precision: u32,
) -> Decimal {
    if price <= 0.0 || !notional.is_finite() {
        return Decimal::ZERO;
    }

    let mut quantity = Decimal::from_f64(notional / price)
        .unwrap_or_default()
        .round_dp(precision);

    if !asset.fractionable {
        quantity = quantity.trunc();
    }
    if held.is_zero() && quantity.is_sign_negative() {
        quantity = if asset.shortable {
            quantity.trunc()
        } else {
            Decimal::ZERO
        };
    }
    if (held > Decimal::ZERO && held + quantity < Decimal::ZERO)
        || (held < Decimal::ZERO && held + quantity > Decimal::ZERO)
    {
        quantity = -held;
    }

    quantity.normalize()
}

/// Limit sells to the long quantity held so no short is ever opened
pub fn no_short(quantities: &[Decimal], held: &[Decimal]) -> Vec<Decimal> {
    quantities
        .iter()
        .zip(held)
        .map(|(quantity, held)| {
            if quantity.is_sign_negative() {
                -quantity.abs().min((*held).max(Decimal::ZERO))
            } else {
                *quantity
            }
        })
        .collect()
}

/// Nullify buys once cash / net worth drops below `cash_ratio_threshold`
pub fn no_margin(
    quantities: &[Decimal],
    cash: Decimal,
    net_worth: Decimal,
    cash_ratio_threshold: f64,
) -> Vec<Decimal> {
    let threshold = Decimal::from_f64(cash_ratio_threshold).unwrap_or_default();
    let low_cash = net_worth <= Decimal::ZERO || cash / net_worth < threshold;

    if !low_cash {
        return quantities.to_vec();
    }

    quantities
        .iter()
        .map(|q| if *q > Decimal::ZERO { Decimal::ZERO } else { *q })
        .collect()
}

/// Broker protections the trader refuses to trip
pub fn check_trade_constraints(account: &Account) -> Result<()> {
    if account.pattern_day_trader && account.portfolio_value <= PATTERN_DAY_TRADER_MINIMUM_EQUITY {
        warn!(
            "Pattern day trader with net worth {} below {}",
            account.portfolio_value, PATTERN_DAY_TRADER_MINIMUM_EQUITY
        );
        return Err(NeuralError::TradeConstraintViolation(
            "Pattern day trader constraint violated.".to_string(),
        ));
    }

    let margin = if account.cash.is_sign_negative() {
        account.cash.abs()
    } else {
        Decimal::ZERO
    };
    if margin * MAINTENANCE_MARGIN > account.portfolio_value {
        warn!(
            "Margin {} exceeds portfolio value {}",
            margin, account.portfolio_value
        );
        return Err(NeuralError::TradeConstraintViolation(
            "Margin constraint violated.".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccountStatus, AssetStatus};
    use crate::data::AssetClass;

    fn asset(fractionable: bool, shortable: bool) -> Asset {
        Asset {
            id: "id".to_string(),
            symbol: "AAPL".to_string(),
            asset_class: AssetClass::UsEquity,
            exchange: "NASDAQ".to_string(),
            name: None,
            status: AssetStatus::Active,
            tradable: true,
            marginable: true,
            shortable,
            easy_to_borrow: shortable,
            fractionable,
        }
    }

    fn account(cash: Decimal, portfolio_value: Decimal, pattern_day_trader: bool) -> Account {
        Account {
            id: "acc".to_string(),
            status: AccountStatus::Active,
            currency: Some("USD".to_string()),
            cash,
            portfolio_value,
            equity: portfolio_value,
            long_market_value: Decimal::ZERO,
            short_market_value: Decimal::ZERO,
            buying_power: Decimal::ZERO,
            pattern_day_trader,
        }
    }

    #[test]
    fn quantity_rounds_to_precision() {
        let q = order_quantity(100.0, 3.0, Decimal::ZERO, &asset(true, true), 5);
        assert_eq!(q, dec!(33.33333));
    }

    #[test]
    fn non_fractionable_truncates() {
        let q = order_quantity(350.0, 100.0, Decimal::ZERO, &asset(false, true), 5);
        assert_eq!(q, dec!(3));
    }

    #[test]
    fn new_shorts_are_whole_or_blocked() {
        let q = order_quantity(-350.0, 100.0, Decimal::ZERO, &asset(true, true), 5);
        assert_eq!(q, dec!(-3));

        let q = order_quantity(-350.0, 100.0, Decimal::ZERO, &asset(true, false), 5);
        assert_eq!(q, Decimal::ZERO);
    }

    #[test]
    fn crossing_trade_only_closes() {
        let q = order_quantity(-500.0, 100.0, dec!(2), &asset(true, true), 5);
        assert_eq!(q, dec!(-2));

        let q = order_quantity(500.0, 100.0, dec!(-2), &asset(true, true), 5);
        assert_eq!(q, dec!(2));
    }

    #[test]
    fn no_short_caps_sells_at_longs() {
        let quantities = [dec!(-5), dec!(-1), dec!(3)];
        let held = [dec!(2), dec!(-4), dec!(0)];
        assert_eq!(no_short(&quantities, &held), vec![dec!(-2), dec!(0), dec!(3)]);
    }

    #[test]
    fn no_margin_blocks_buys_when_cash_is_low() {
        let quantities = [dec!(5), dec!(-1)];
        assert_eq!(
            no_margin(&quantities, dec!(5), dec!(100), 0.1),
            vec![dec!(0), dec!(-1)]
        );
        assert_eq!(no_margin(&quantities, dec!(50), dec!(100), 0.1), quantities.to_vec());
    }

    #[test]
    fn constraints() {
        assert!(check_trade_constraints(&account(dec!(100), dec!(30000), true)).is_ok());
        assert!(matches!(
            check_trade_constraints(&account(dec!(100), dec!(20000), true)),
            Err(NeuralError::TradeConstraintViolation(_))
        ));
        assert!(check_trade_constraints(&account(dec!(100), dec!(20000), false)).is_ok());
        assert!(matches!(
            check_trade_constraints(&account(dec!(-5000), dec!(4000), false)),
            Err(NeuralError::TradeConstraintViolation(_))
        ));
    }
}
