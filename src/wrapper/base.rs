//! Account Bookkeeping Wrappers
//!
//! `MarginAccountMetaDataWrapper` records account metrics after every step;
//! `ConsoleTearsheetRenderWrapper` summarises them as a table in the log.

use chrono::{DateTime, Utc};
use tabled::{Table, Tabled};
use tracing::{debug, info};

use crate::env::{AccountRecord, MarketEnv, MarketSnapshot, Observation, StepResult, Wrapper};
use crate::error::Result;

/// Account records kept by default; about a year of one-minute steps
pub const DEFAULT_HISTORY_LIMIT: usize = 525_600;

/// Records `AccountRecord`s for outer wrappers to read.
///
/// Only the latest `history_limit` records are exposed, so a live session
/// that never resets does not grow without bound.
pub struct MarginAccountMetaDataWrapper {
    env: Box<dyn MarketEnv>,
    initial_margin: f64,
    history_limit: usize,
    history: Vec<AccountRecord>,
}

impl MarginAccountMetaDataWrapper {
    pub fn new(env: Box<dyn MarketEnv>) -> Self {
        Self::with_initial_margin(env, 1.0)
    }

    pub fn with_initial_margin(env: Box<dyn MarketEnv>, initial_margin: f64) -> Self {
        Self {
            env,
            initial_margin,
            history_limit: DEFAULT_HISTORY_LIMIT,
            history: Vec::new(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    fn record(&mut self) {
        let record = account_record(self.env.snapshot(), self.initial_margin);
        self.history.push(record);

        // drop old records in chunks so trimming stays amortized O(1)
        let slack = self.history_limit / 4 + 1;
        if self.history.len() > self.history_limit + slack {
            let excess = self.history.len() - self.history_limit;
            self.history.drain(..excess);
        }
    }
}

/// Account metrics of a snapshot under the given initial margin
pub fn account_record(snapshot: &MarketSnapshot, initial_margin: f64) -> AccountRecord {
    let longs = snapshot.longs();
    let shorts = snapshot.shorts();
    let net_worth = snapshot.net_worth();
    AccountRecord {
        timestamp: snapshot.timestamp,
        net_worth,
        cash: snapshot.cash,
        longs,
        shorts,
        excess_margin: net_worth - initial_margin * (longs + shorts),
    }
}

impl Wrapper for MarginAccountMetaDataWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        self.history.clear();
        self.record();
        Ok(observation)
    }

    fn on_step(&mut self, result: StepResult) -> Result<StepResult> {
        self.record();
        Ok(result)
    }

    fn history(&self) -> Option<&[AccountRecord]> {
        let skip = self.history.len().saturating_sub(self.history_limit);
        Some(&self.history[skip..])
    }
}

/// Return per step from a net worth series
pub fn returns(net_worth: &[f64]) -> Vec<f64> {
    net_worth
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { w[1] / w[0] - 1.0 })
        .collect()
}

/// Mean over standard deviation of per-step returns, not annualised
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev
}

/// Largest peak to trough loss as a fraction of the peak
pub fn max_drawdown(net_worth: &[f64]) -> f64 {
    let Some(&first) = net_worth.first() else {
        return 0.0;
    };

    let mut peak = first;
    let mut max_drawdown = 0.0_f64;
    for &value in net_worth {
        peak = peak.max(value);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - value) / peak);
        }
    }
    max_drawdown
}

#[derive(Debug, Clone, Tabled)]
pub struct TearsheetRow {
    #[tabled(rename = "Start")]
    pub start: DateTime<Utc>,
    #[tabled(rename = "End")]
    pub end: DateTime<Utc>,
    #[tabled(rename = "Steps")]
    pub steps: usize,
    #[tabled(rename = "Net Worth")]
    pub net_worth: String,
    #[tabled(rename = "Return")]
    pub total_return: String,
    #[tabled(rename = "Sharpe")]
    pub sharpe: String,
    #[tabled(rename = "Max DD")]
    pub max_drawdown: String,
    #[tabled(rename = "Longs")]
    pub longs: String,
    #[tabled(rename = "Shorts")]
    pub shorts: String,
    #[tabled(rename = "Cash")]
    pub cash: String,
}

impl TearsheetRow {
    pub fn from_history(history: &[AccountRecord]) -> Option<Self> {
        let first = history.first()?;
        let last = history.last()?;
        let net_worth: Vec<f64> = history.iter().map(|r| r.net_worth).collect();
        let total_return = if first.net_worth == 0.0 {
            0.0
        } else {
            last.net_worth / first.net_worth - 1.0
        };

        Some(Self {
            start: first.timestamp,
            end: last.timestamp,
            steps: history.len() - 1,
            net_worth: format!("{:.2}", last.net_worth),
            total_return: format!("{:.2}%", total_return * 100.0),
            sharpe: format!("{:.4}", sharpe_ratio(&returns(&net_worth))),
            max_drawdown: format!("{:.2}%", max_drawdown(&net_worth) * 100.0),
            longs: format!("{:.2}", last.longs),
            shorts: format!("{:.2}", last.shorts),
            cash: format!("{:.2}", last.cash),
        })
    }
}

/// Logs a tearsheet every `verbosity` steps and when the episode ends
pub struct ConsoleTearsheetRenderWrapper {
    env: Box<dyn MarketEnv>,
    verbosity: usize,
    steps: usize,
}

impl ConsoleTearsheetRenderWrapper {
    pub fn new(env: Box<dyn MarketEnv>, verbosity: usize) -> Self {
        Self {
            env,
            verbosity,
            steps: 0,
        }
    }

    fn tearsheet(&self) -> Option<String> {
        let row = TearsheetRow::from_history(self.env.account_history()?)?;
        Some(Table::new([row]).to_string())
    }
}

impl Wrapper for ConsoleTearsheetRenderWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        self.steps = 0;
        Ok(observation)
    }

    fn on_step(&mut self, result: StepResult) -> Result<StepResult> {
        self.steps += 1;
        let periodic = self.verbosity > 0 && self.steps % self.verbosity == 0;
        if periodic || result.done {
            self.on_render();
        }
        Ok(result)
    }

    fn on_render(&mut self) {
        match self.tearsheet() {
            Some(table) => info!("\n{}", table),
            None => debug!("No account history to render"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::train::tests::feeder;
    use crate::env::TrainMarketEnv;

    #[test]
    fn drawdown_and_sharpe() {
        assert_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0]), 0.25);
        assert_eq!(max_drawdown(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01]), 0.0);
        assert!(sharpe_ratio(&[0.02, 0.0]) > 0.99);
    }

    #[test]
    fn metadata_wrapper_records_every_step() {
        let env = TrainMarketEnv::new(feeder(&[[10.0, 10.0], [20.0, 10.0], [20.0, 5.0]])).unwrap();
        let mut env = MarginAccountMetaDataWrapper::new(Box::new(env));
        env.reset().unwrap();
        env.step(&[1_000.0, -1_000.0]).unwrap();

        let history = env.account_history().unwrap();
        assert_eq!(history.len(), 2);
        let last = history[1];
        assert_eq!(last.longs, 2_000.0);
        assert_eq!(last.shorts, 1_000.0);
        assert_eq!(last.excess_margin, last.net_worth - 3_000.0);

        env.reset().unwrap();
        assert_eq!(env.account_history().unwrap().len(), 1);
    }

    #[test]
    fn history_keeps_only_the_latest_records() {
        let rows: Vec<[f32; 2]> = (0..12).map(|i| [10.0 + i as f32, 10.0]).collect();
        let env = TrainMarketEnv::new(feeder(&rows)).unwrap();
        let mut env = MarginAccountMetaDataWrapper::new(Box::new(env)).with_history_limit(3);
        env.reset().unwrap();
        for _ in 0..10 {
            env.step(&[0.0, 0.0]).unwrap();
        }

        let history = env.account_history().unwrap();
        assert_eq!(history.len(), 3);
        assert!(env.history.len() <= 3 + 3 / 4 + 1);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(history[2].timestamp, env.snapshot().timestamp);
    }

    #[test]
    fn tearsheet_reads_history_through_wrappers() {
        let env = TrainMarketEnv::new(feeder(&[[10.0, 10.0], [20.0, 10.0]])).unwrap();
        let env = MarginAccountMetaDataWrapper::new(Box::new(env));
        let mut env = ConsoleTearsheetRenderWrapper::new(Box::new(env), 1);
        env.reset().unwrap();
        env.step(&[0.0, 0.0]).unwrap();

        let table = env.tearsheet().unwrap();
        assert!(table.contains("Max DD"));
        assert!(table.contains("0.00%"));
    }
}
