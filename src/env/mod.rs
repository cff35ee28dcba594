//! Market Environments
//!
//! Gym-like `reset`/`step` interface shared by the offline training
//! environment and the live trading bridge. Actions at this layer are signed
//! notional trade values in USD, one per asset.

pub mod trade;
pub mod train;

pub use trade::{TradeMarketEnv, TraderHandle};
pub use train::TrainMarketEnv;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::Result;

/// Account and market state at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Negative when borrowing
    pub cash: f64,
    /// Signed quantities, shorts negative
    pub asset_quantities: Vec<f64>,
    pub asset_prices: Vec<f64>,
    pub features: Vec<f32>,
}

impl MarketSnapshot {
    /// Signed market value per asset
    pub fn positions(&self) -> Vec<f64> {
        self.asset_quantities
            .iter()
            .zip(&self.asset_prices)
            .map(|(q, p)| q * p)
            .collect()
    }

    pub fn longs(&self) -> f64 {
        self.positions().into_iter().filter(|v| *v > 0.0).sum()
    }

    /// Absolute value of short positions
    pub fn shorts(&self) -> f64 {
        self.positions()
            .into_iter()
            .filter(|v| *v < 0.0)
            .map(f64::abs)
            .sum()
    }

    pub fn net_worth(&self) -> f64 {
        self.cash + self.longs() - self.shorts()
    }
}

/// Observation produced by an environment
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Dict(BTreeMap<String, Vec<f32>>),
    Vector(Vec<f32>),
}

impl Observation {
    /// Flatten, concatenating dict entries in key order
    pub fn into_vector(self) -> Vec<f32> {
        match self {
            Self::Vector(v) => v,
            Self::Dict(map) => map.into_values().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Vector(v) => v.len(),
            Self::Dict(map) => map.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Additional step information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    pub timestamp: Option<DateTime<Utc>>,
    pub net_worth: f64,
    pub cash: f64,
}

/// Result of taking a step in the environment
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    /// Whether the data or the live session ended
    pub done: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

/// Account metrics recorded after every step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountRecord {
    pub timestamp: DateTime<Utc>,
    pub net_worth: f64,
    pub cash: f64,
    pub longs: f64,
    pub shorts: f64,
    /// Equity minus initial margin on gross exposure
    pub excess_margin: f64,
}

/// A market environment or a wrapper around one
pub trait MarketEnv: Send {
    fn reset(&mut self) -> Result<Observation>;

    fn step(&mut self, action: &[f64]) -> Result<StepResult>;

    fn snapshot(&self) -> &MarketSnapshot;

    fn n_assets(&self) -> usize;

    /// Length of the action this layer accepts
    fn action_size(&self) -> usize {
        self.n_assets()
    }

    fn render(&mut self) {}

    /// Per-step account history, when a layer records one
    fn account_history(&self) -> Option<&[AccountRecord]> {
        None
    }
}

/// Hooks for a layer around another environment.
///
/// Every `Wrapper` is a `MarketEnv`: actions pass through `action` on the way
/// in, observations and rewards through `on_reset`/`on_step` on the way out.
pub trait Wrapper: Send {
    fn inner(&self) -> &dyn MarketEnv;

    fn inner_mut(&mut self) -> &mut dyn MarketEnv;

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        Ok(observation)
    }

    fn action(&mut self, action: &[f64]) -> Result<Vec<f64>> {
        Ok(action.to_vec())
    }

    fn on_step(&mut self, result: StepResult) -> Result<StepResult> {
        Ok(result)
    }

    fn outer_action_size(&self) -> usize {
        self.inner().action_size()
    }

    fn on_render(&mut self) {
        self.inner_mut().render()
    }

    fn history(&self) -> Option<&[AccountRecord]> {
        self.inner().account_history()
    }
}

impl<W: Wrapper> MarketEnv for W {
    fn reset(&mut self) -> Result<Observation> {
        let observation = self.inner_mut().reset()?;
        self.on_reset(observation)
    }

    fn step(&mut self, action: &[f64]) -> Result<StepResult> {
        let action = self.action(action)?;
        let result = self.inner_mut().step(&action)?;
        self.on_step(result)
    }

    fn snapshot(&self) -> &MarketSnapshot {
        self.inner().snapshot()
    }

    fn n_assets(&self) -> usize {
        self.inner().n_assets()
    }

    fn action_size(&self) -> usize {
        self.outer_action_size()
    }

    fn render(&mut self) {
        self.on_render()
    }

    fn account_history(&self) -> Option<&[AccountRecord]> {
        self.history()
    }
}

/// Steps held per position; restarts when a position opens or flips
#[derive(Debug, Clone, Default)]
pub(crate) struct HoldCounter {
    holds: Vec<u64>,
}

impl HoldCounter {
    pub(crate) fn new(n_assets: usize) -> Self {
        Self {
            holds: vec![0; n_assets],
        }
    }

    pub(crate) fn update(&mut self, before: &[f64], after: &[f64]) {
        for ((hold, b), a) in self.holds.iter_mut().zip(before).zip(after) {
            if *a == 0.0 || a.signum() != b.signum() || *b == 0.0 {
                *hold = 0;
            } else {
                *hold += 1;
            }
        }
    }

    pub(crate) fn as_f32(&self) -> Vec<f32> {
        self.holds.iter().map(|h| *h as f32).collect()
    }
}

/// Dict observation `{cash, asset_quantities, holds, features}`
pub(crate) fn snapshot_observation(snapshot: &MarketSnapshot, holds: &HoldCounter) -> Observation {
    let mut map = BTreeMap::new();
    map.insert("cash".to_string(), vec![snapshot.cash as f32]);
    map.insert(
        "asset_quantities".to_string(),
        snapshot.asset_quantities.iter().map(|q| *q as f32).collect(),
    );
    map.insert("holds".to_string(), holds.as_f32());
    map.insert("features".to_string(), snapshot.features.clone());
    Observation::Dict(map)
}
