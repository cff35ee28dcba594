//! Action Wrappers
//!
//! Head wrappers turn raw model outputs into notional trades:
//! - Parsers size trades from a share of equity, fixed or model chosen,
//!   spread uniformly or by model weights
//! - `DiscreteActionMapper` maps discrete choices onto `[-1, 1]`
//! - `ActionClipperWrapper` bounds raw outputs
//!
//! The remaining wrappers act on notional trades and enforce trading logic
//! such as minimum size, whole shares, and margin limits.

use tracing::debug;

use super::base::account_record;
use crate::env::{MarketEnv, Wrapper};
use crate::error::{NeuralError, Result};

fn check_len(action: &[f64], expected: usize) -> Result<()> {
    if action.len() != expected {
        return Err(NeuralError::validation(format!(
            "expected {} actions, got {}",
            expected,
            action.len()
        )));
    }
    Ok(())
}

/// Notional for one signal under a budget; zero inside the hold band
fn uniform_notional(signal: f64, hold_threshold: f64, budget: f64) -> f64 {
    let signal = signal.clamp(-1.0, 1.0);
    if signal.abs() <= hold_threshold {
        0.0
    } else {
        signal * budget
    }
}

/// Notional from a side signal and a budget weight
fn weighted_notional(sides: &[f64], weights: &[f64], hold_threshold: f64, budget: f64) -> Vec<f64> {
    let weights: Vec<f64> = weights.iter().map(|w| w.max(0.0)).collect();
    let total: f64 = weights.iter().sum();

    sides
        .iter()
        .zip(&weights)
        .map(|(side, weight)| {
            if total <= 0.0 || side.abs() <= hold_threshold {
                0.0
            } else {
                side.signum() * weight / total * budget
            }
        })
        .collect()
}

/// `n` signals in `[-1, 1]`, budget `trade_equity_ratio * equity` split evenly
pub struct EquityBasedFixedUniformActionParser {
    env: Box<dyn MarketEnv>,
    trade_equity_ratio: f64,
    hold_threshold: f64,
}

impl EquityBasedFixedUniformActionParser {
    pub fn new(env: Box<dyn MarketEnv>, trade_equity_ratio: f64, hold_threshold: f64) -> Self {
        Self {
            env,
            trade_equity_ratio,
            hold_threshold,
        }
    }
}

impl Wrapper for EquityBasedFixedUniformActionParser {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let n = self.env.n_assets();
        check_len(action, n)?;
        let budget = self.trade_equity_ratio * self.env.snapshot().net_worth() / n as f64;
        Ok(action
            .iter()
            .map(|a| uniform_notional(*a, self.hold_threshold, budget))
            .collect())
    }

    fn outer_action_size(&self) -> usize {
        self.env.n_assets()
    }
}

/// `n` signals plus a trailing equity ratio in `[0, 1]`
pub struct EquityBasedVariableUniformActionParser {
    env: Box<dyn MarketEnv>,
    hold_threshold: f64,
}

impl EquityBasedVariableUniformActionParser {
    pub fn new(env: Box<dyn MarketEnv>, hold_threshold: f64) -> Self {
        Self {
            env,
            hold_threshold,
        }
    }
}

impl Wrapper for EquityBasedVariableUniformActionParser {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let n = self.env.n_assets();
        check_len(action, n + 1)?;
        let ratio = action[n].clamp(0.0, 1.0);
        let budget = ratio * self.env.snapshot().net_worth() / n as f64;
        Ok(action[..n]
            .iter()
            .map(|a| uniform_notional(*a, self.hold_threshold, budget))
            .collect())
    }

    fn outer_action_size(&self) -> usize {
        self.env.n_assets() + 1
    }
}

/// `n` sides in `[-1, 1]` then `n` budget weights
pub struct EquityBasedFixedNonUniformActionParser {
    env: Box<dyn MarketEnv>,
    trade_equity_ratio: f64,
    hold_threshold: f64,
}

impl EquityBasedFixedNonUniformActionParser {
    pub fn new(env: Box<dyn MarketEnv>, trade_equity_ratio: f64, hold_threshold: f64) -> Self {
        Self {
            env,
            trade_equity_ratio,
            hold_threshold,
        }
    }
}

impl Wrapper for EquityBasedFixedNonUniformActionParser {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let n = self.env.n_assets();
        check_len(action, 2 * n)?;
        let budget = self.trade_equity_ratio * self.env.snapshot().net_worth();
        Ok(weighted_notional(
            &action[..n],
            &action[n..],
            self.hold_threshold,
            budget,
        ))
    }

    fn outer_action_size(&self) -> usize {
        2 * self.env.n_assets()
    }
}

/// `n` sides, `n` weights and a trailing equity ratio in `[0, 1]`
pub struct EquityBasedVariableNonUniformActionParser {
    env: Box<dyn MarketEnv>,
    hold_threshold: f64,
}

impl EquityBasedVariableNonUniformActionParser {
    pub fn new(env: Box<dyn MarketEnv>, hold_threshold: f64) -> Self {
        Self {
            env,
            hold_threshold,
        }
    }
}

impl Wrapper for EquityBasedVariableNonUniformActionParser {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let n = self.env.n_assets();
        check_len(action, 2 * n + 1)?;
        let ratio = action[2 * n].clamp(0.0, 1.0);
        let budget = ratio * self.env.snapshot().net_worth();
        Ok(weighted_notional(
            &action[..n],
            &action[n..2 * n],
            self.hold_threshold,
            budget,
        ))
    }

    fn outer_action_size(&self) -> usize {
        2 * self.env.n_assets() + 1
    }
}

/// Maps indices `0..=2k` to signals: 0 holds, `1..=k` buy with growing
/// strength above the hold threshold, `k+1..=2k` sell likewise.
pub struct DiscreteActionMapper {
    env: Box<dyn MarketEnv>,
    levels: Vec<f64>,
}

impl DiscreteActionMapper {
    pub fn new(env: Box<dyn MarketEnv>, actions_per_side: usize, hold_threshold: f64) -> Result<Self> {
        if actions_per_side == 0 {
            return Err(NeuralError::validation(
                "discrete actions per side must be at least 1",
            ));
        }
        let k = actions_per_side as f64;
        let levels = (1..=actions_per_side)
            .map(|j| hold_threshold + (1.0 - hold_threshold) * j as f64 / k)
            .collect();
        Ok(Self { env, levels })
    }

    fn map(&self, index: f64) -> Result<f64> {
        let k = self.levels.len();
        let i = index.round();
        if i < 0.0 || i > (2 * k) as f64 {
            return Err(NeuralError::validation(format!(
                "discrete action {} outside 0..={}",
                index,
                2 * k
            )));
        }
        let i = i as usize;
        Ok(match i {
            0 => 0.0,
            i if i <= k => self.levels[i - 1],
            i => -self.levels[i - k - 1],
        })
    }
}

impl Wrapper for DiscreteActionMapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        check_len(action, self.env.action_size())?;
        action.iter().map(|a| self.map(*a)).collect()
    }
}

pub struct ActionClipperWrapper {
    env: Box<dyn MarketEnv>,
    low: f64,
    high: f64,
}

impl ActionClipperWrapper {
    pub fn new(env: Box<dyn MarketEnv>, low: f64, high: f64) -> Self {
        Self { env, low, high }
    }
}

impl Wrapper for ActionClipperWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        Ok(action.iter().map(|a| a.clamp(self.low, self.high)).collect())
    }
}

/// Drops trades smaller than `min_trade` in notional value
pub struct MinTradeSizeActionWrapper {
    env: Box<dyn MarketEnv>,
    min_trade: f64,
}

impl MinTradeSizeActionWrapper {
    pub fn new(env: Box<dyn MarketEnv>, min_trade: f64) -> Self {
        Self { env, min_trade }
    }
}

impl Wrapper for MinTradeSizeActionWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        Ok(action
            .iter()
            .map(|a| if a.abs() < self.min_trade { 0.0 } else { *a })
            .collect())
    }
}

/// Whole number of shares traded, rounded toward zero
fn whole_shares(notional: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    (notional / price).trunc() * price
}

pub struct IntegerAssetQuantityActionWrapper {
    env: Box<dyn MarketEnv>,
    integer: bool,
}

impl IntegerAssetQuantityActionWrapper {
    pub fn new(env: Box<dyn MarketEnv>, integer: bool) -> Self {
        Self { env, integer }
    }
}

impl Wrapper for IntegerAssetQuantityActionWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        if !self.integer {
            return Ok(action.to_vec());
        }
        let prices = &self.env.snapshot().asset_prices;
        Ok(action
            .iter()
            .zip(prices)
            .map(|(a, p)| whole_shares(*a, *p))
            .collect())
    }
}

/// Trades that would flip a position only close it
pub struct PositionCloseActionWrapper {
    env: Box<dyn MarketEnv>,
}

impl PositionCloseActionWrapper {
    pub fn new(env: Box<dyn MarketEnv>) -> Self {
        Self { env }
    }
}

impl Wrapper for PositionCloseActionWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let positions = self.env.snapshot().positions();
        Ok(action
            .iter()
            .zip(positions)
            .map(|(a, value)| {
                if value != 0.0 && (value + a) * value < 0.0 {
                    -value
                } else {
                    *a
                }
            })
            .collect())
    }
}

/// Trades opening or growing a short use whole shares
pub struct ShortingActionWrapper {
    env: Box<dyn MarketEnv>,
}

impl ShortingActionWrapper {
    pub fn new(env: Box<dyn MarketEnv>) -> Self {
        Self { env }
    }
}

impl Wrapper for ShortingActionWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let snapshot = self.env.snapshot();
        Ok(action
            .iter()
            .zip(&snapshot.asset_quantities)
            .zip(&snapshot.asset_prices)
            .map(|((a, quantity), price)| {
                if *a < 0.0 && *quantity <= 0.0 {
                    whole_shares(*a, *price)
                } else {
                    *a
                }
            })
            .collect())
    }
}

/// Part of `|trade|` that grows the absolute position
fn exposure_increase(position: f64, trade: f64) -> f64 {
    if position == 0.0 || position.signum() == trade.signum() {
        trade.abs()
    } else {
        (trade.abs() - position.abs()).max(0.0)
    }
}

/// Keep the reducing part of a trade, scale the increasing part
fn scale_increase(position: f64, trade: f64, factor: f64) -> f64 {
    let increase = exposure_increase(position, trade);
    if increase == 0.0 {
        return trade;
    }
    let reduce = trade.abs() - increase;
    trade.signum() * (reduce + increase * factor)
}

/// Scales exposure-increasing trades so their initial margin fits in the
/// account's excess margin
pub struct InitialMarginActionWrapper {
    env: Box<dyn MarketEnv>,
    initial_margin: f64,
}

impl InitialMarginActionWrapper {
    pub fn new(env: Box<dyn MarketEnv>, initial_margin: f64) -> Self {
        Self {
            env,
            initial_margin,
        }
    }
}

impl Wrapper for InitialMarginActionWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let snapshot = self.env.snapshot();
        let positions = snapshot.positions();
        let excess_margin = account_record(snapshot, self.initial_margin)
            .excess_margin
            .max(0.0);

        let required: f64 = action
            .iter()
            .zip(&positions)
            .map(|(a, v)| exposure_increase(*v, *a))
            .sum::<f64>()
            * self.initial_margin;

        if required <= excess_margin {
            return Ok(action.to_vec());
        }

        let factor = excess_margin / required;
        debug!(
            "Initial margin {:.2} exceeds excess margin {:.2}, scaling by {:.4}",
            required, excess_margin, factor
        );
        Ok(action
            .iter()
            .zip(&positions)
            .map(|(a, v)| scale_increase(*v, *a, factor))
            .collect())
    }
}

/// Blocks exposure-increasing trades while excess margin / equity is below
/// the threshold
pub struct ExcessMarginActionWrapper {
    env: Box<dyn MarketEnv>,
    excess_margin_ratio_threshold: f64,
}

impl ExcessMarginActionWrapper {
    pub fn new(env: Box<dyn MarketEnv>, excess_margin_ratio_threshold: f64) -> Self {
        Self {
            env,
            excess_margin_ratio_threshold,
        }
    }
}

impl Wrapper for ExcessMarginActionWrapper {
    delegate_inner!();

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        let snapshot = self.env.snapshot();
        let record = account_record(snapshot, 1.0);
        let ratio = if record.net_worth > 0.0 {
            record.excess_margin / record.net_worth
        } else {
            f64::NEG_INFINITY
        };

        if ratio >= self.excess_margin_ratio_threshold {
            return Ok(action.to_vec());
        }

        debug!(
            "Excess margin ratio {:.4} below {:.4}, only reducing trades allowed",
            ratio, self.excess_margin_ratio_threshold
        );
        Ok(action
            .iter()
            .zip(snapshot.positions())
            .map(|(a, v)| scale_increase(v, *a, 0.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::train::tests::feeder;
    use crate::env::{MarketSnapshot, Observation, StepResult};
    use std::sync::{Arc, Mutex};

    /// Records the notional actions reaching the bottom of the stack
    struct Recorder {
        snapshot: MarketSnapshot,
        seen: Arc<Mutex<Vec<Vec<f64>>>>,
    }

    impl Recorder {
        fn boxed(cash: f64, quantities: Vec<f64>, prices: Vec<f64>) -> (Box<dyn MarketEnv>, Arc<Mutex<Vec<Vec<f64>>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let env = Recorder {
                snapshot: MarketSnapshot {
                    timestamp: chrono::Utc::now(),
                    cash,
                    asset_quantities: quantities,
                    asset_prices: prices,
                    features: vec![],
                },
                seen: Arc::clone(&seen),
            };
            (Box::new(env), seen)
        }
    }

    impl MarketEnv for Recorder {
        fn reset(&mut self) -> Result<Observation> {
            Ok(Observation::Vector(vec![]))
        }

        fn step(&mut self, action: &[f64]) -> Result<StepResult> {
            self.seen.lock().unwrap().push(action.to_vec());
            Ok(StepResult {
                observation: Observation::Vector(vec![]),
                reward: 0.0,
                done: false,
                truncated: false,
                info: Default::default(),
            })
        }

        fn snapshot(&self) -> &MarketSnapshot {
            &self.snapshot
        }

        fn n_assets(&self) -> usize {
            self.snapshot.asset_prices.len()
        }
    }

    fn last(seen: &Arc<Mutex<Vec<Vec<f64>>>>) -> Vec<f64> {
        seen.lock().unwrap().last().cloned().unwrap()
    }

    #[test]
    fn fixed_uniform_parser_sizes_from_equity() {
        let (env, seen) = Recorder::boxed(1_000.0, vec![0.0, 0.0], vec![10.0, 10.0]);
        let mut env = EquityBasedFixedUniformActionParser::new(env, 0.1, 0.15);
        env.step(&[0.5, 0.1]).unwrap();
        // 0.5 * 0.1 * 1000 / 2; the second signal is inside the hold band
        assert_eq!(last(&seen), vec![25.0, 0.0]);
    }

    #[test]
    fn variable_parsers_take_ratio_from_last_output() {
        let (env, seen) = Recorder::boxed(1_000.0, vec![0.0, 0.0], vec![10.0, 10.0]);
        let mut env = EquityBasedVariableUniformActionParser::new(env, 0.15);
        assert_eq!(env.action_size(), 3);
        env.step(&[-1.0, 1.0, 0.2]).unwrap();
        assert_eq!(last(&seen), vec![-100.0, 100.0]);

        let (env, seen) = Recorder::boxed(1_000.0, vec![0.0, 0.0], vec![10.0, 10.0]);
        let mut env = EquityBasedVariableNonUniformActionParser::new(env, 0.15);
        assert_eq!(env.action_size(), 5);
        env.step(&[-1.0, 0.5, 3.0, 1.0, 0.4]).unwrap();
        assert_eq!(last(&seen), vec![-300.0, 100.0]);
    }

    #[test]
    fn fixed_non_uniform_parser_normalises_weights() {
        let (env, seen) = Recorder::boxed(1_000.0, vec![0.0, 0.0], vec![10.0, 10.0]);
        let mut env = EquityBasedFixedNonUniformActionParser::new(env, 0.1, 0.15);
        env.step(&[0.9, 0.1, 1.0, 3.0]).unwrap();
        assert_eq!(last(&seen), vec![25.0, 0.0]);
        assert!(env.step(&[0.9, 0.1]).is_err());
    }

    #[test]
    fn discrete_mapper_spreads_levels() {
        let (env, seen) = Recorder::boxed(1_000.0, vec![0.0; 5], vec![10.0; 5]);
        let mut env = DiscreteActionMapper::new(env, 2, 0.2).unwrap();
        env.step(&[0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let mapped = last(&seen);
        let expected = [0.0, 0.6, 1.0, -0.6, -1.0];
        for (m, e) in mapped.iter().zip(expected) {
            assert!((m - e).abs() < 1e-12);
        }
        assert!(env.step(&[5.0, 0.0, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn notional_filters() {
        let (env, seen) = Recorder::boxed(1_000.0, vec![2.0, 0.0, -1.0], vec![10.0, 10.0, 10.0]);
        let env = MinTradeSizeActionWrapper::new(env, 1.0);
        let env = IntegerAssetQuantityActionWrapper::new(Box::new(env), true);
        let env = PositionCloseActionWrapper::new(Box::new(env));
        let mut env = ShortingActionWrapper::new(Box::new(env));

        env.step(&[-50.0, -25.0, 0.5]).unwrap();
        // flip of the long is cut to a close; the new short uses whole shares;
        // the tiny trade is dropped
        assert_eq!(last(&seen), vec![-20.0, -20.0, 0.0]);
    }

    #[test]
    fn initial_margin_scales_increasing_trades() {
        // net worth 1000, gross exposure 500 -> excess margin 500
        let (env, seen) = Recorder::boxed(500.0, vec![50.0, 0.0], vec![10.0, 10.0]);
        let mut env = InitialMarginActionWrapper::new(env, 1.0);

        env.step(&[600.0, 400.0]).unwrap();
        assert_eq!(last(&seen), vec![300.0, 200.0]);

        // reducing trades pass untouched
        env.step(&[-300.0, 0.0]).unwrap();
        assert_eq!(last(&seen), vec![-300.0, 0.0]);
    }

    #[test]
    fn excess_margin_blocks_increasing_trades() {
        // net worth 1000, gross 950 -> ratio 0.05
        let (env, seen) = Recorder::boxed(50.0, vec![95.0, 0.0], vec![10.0, 10.0]);
        let mut env = ExcessMarginActionWrapper::new(env, 0.1);
        env.step(&[100.0, -100.0]).unwrap();
        assert_eq!(last(&seen), vec![0.0, 0.0]);

        env.step(&[-2_000.0, 0.0]).unwrap();
        assert_eq!(last(&seen), vec![-950.0, 0.0]);
    }

    #[test]
    fn parser_stack_over_training_env() {
        let env = crate::env::TrainMarketEnv::new(feeder(&[[10.0, 20.0], [10.0, 20.0]])).unwrap();
        let mut env = EquityBasedFixedUniformActionParser::new(Box::new(env), 0.02, 0.15);
        env.reset().unwrap();
        env.step(&[1.0, -1.0]).unwrap();
        // 0.02 * 1e6 / 2 = 10_000 per asset
        assert_eq!(env.snapshot().asset_quantities, vec![1_000.0, -500.0]);
    }
}
