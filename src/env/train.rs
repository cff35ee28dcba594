//! Training Environment
//!
//! Replays a stored dataset and fills notional trades at the row's prices.
//! No fees, no slippage; reward is left to reward wrappers.

use tracing::{debug, info};

use super::{
    snapshot_observation, HoldCounter, MarketEnv, MarketSnapshot, Observation, StepInfo,
    StepResult,
};
use crate::data::{PriceSource, StaticDataFeeder};
use crate::error::{NeuralError, Result};

pub const DEFAULT_INITIAL_CASH: f64 = 1_000_000.0;

pub struct TrainMarketEnv {
    feeder: StaticDataFeeder,
    price_sources: Vec<PriceSource>,
    initial_cash: f64,
    initial_asset_quantities: Option<Vec<f64>>,
    snapshot: MarketSnapshot,
    holds: HoldCounter,
    steps: usize,
}

impl TrainMarketEnv {
    pub fn new(feeder: StaticDataFeeder) -> Result<Self> {
        Self::with_account(feeder, DEFAULT_INITIAL_CASH, None)
    }

    /// Start from a given cash balance and, optionally, existing holdings
    pub fn with_account(
        feeder: StaticDataFeeder,
        initial_cash: f64,
        initial_asset_quantities: Option<Vec<f64>>,
    ) -> Result<Self> {
        let metadata = feeder.metadata();
        let price_sources = metadata.asset_price_sources()?;
        let n_assets = metadata.n_assets();

        if let Some(quantities) = &initial_asset_quantities {
            if quantities.len() != n_assets {
                return Err(NeuralError::validation(format!(
                    "initial asset quantities have {} entries for {} assets",
                    quantities.len(),
                    n_assets
                )));
            }
        }

        let snapshot = MarketSnapshot {
            timestamp: metadata.start,
            cash: initial_cash,
            asset_quantities: vec![0.0; n_assets],
            asset_prices: vec![0.0; n_assets],
            features: Vec::new(),
        };

        Ok(Self {
            feeder,
            price_sources,
            initial_cash,
            initial_asset_quantities,
            snapshot,
            holds: HoldCounter::new(n_assets),
            steps: 0,
        })
    }

    /// Advance to the next row; false when data ran out
    fn advance(&mut self) -> bool {
        match self.feeder.next() {
            Some(row) => {
                self.snapshot.asset_prices = self
                    .price_sources
                    .iter()
                    .map(|source| source.read(&row.features) as f64)
                    .collect();
                self.snapshot.timestamp = row.timestamp;
                self.snapshot.features = row.features;
                true
            }
            None => false,
        }
    }

    fn execute(&mut self, action: &[f64]) {
        for (i, notional) in action.iter().enumerate() {
            let price = self.snapshot.asset_prices[i];
            if *notional == 0.0 || price <= 0.0 {
                continue;
            }
            self.snapshot.asset_quantities[i] += notional / price;
            self.snapshot.cash -= notional;
        }
    }
}

impl MarketEnv for TrainMarketEnv {
    fn reset(&mut self) -> Result<Observation> {
        self.feeder.reset();
        self.steps = 0;
        self.snapshot.cash = self.initial_cash;
        self.snapshot.asset_quantities = self
            .initial_asset_quantities
            .clone()
            .unwrap_or_else(|| vec![0.0; self.n_assets()]);
        self.holds = HoldCounter::new(self.n_assets());

        if !self.advance() {
            return Err(NeuralError::DataUnavailable(
                "dataset has no rows to train on".to_string(),
            ));
        }

        debug!(
            "Environment reset at {} with {} rows",
            self.snapshot.timestamp,
            self.feeder.n_rows()
        );
        Ok(snapshot_observation(&self.snapshot, &self.holds))
    }

    fn step(&mut self, action: &[f64]) -> Result<StepResult> {
        if action.len() != self.n_assets() {
            return Err(NeuralError::validation(format!(
                "expected {} actions, got {}",
                self.n_assets(),
                action.len()
            )));
        }

        let before = self.snapshot.asset_quantities.clone();
        self.execute(action);
        self.holds.update(&before, &self.snapshot.asset_quantities);
        self.steps += 1;

        let done = !self.advance() || self.feeder.done();

        Ok(StepResult {
            observation: snapshot_observation(&self.snapshot, &self.holds),
            reward: 0.0,
            done,
            truncated: false,
            info: StepInfo {
                timestamp: Some(self.snapshot.timestamp),
                net_worth: self.snapshot.net_worth(),
                cash: self.snapshot.cash,
            },
        })
    }

    fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }

    fn n_assets(&self) -> usize {
        self.price_sources.len()
    }

    fn render(&mut self) {
        info!(
            "step {} | {} | net worth {:.2} | cash {:.2}",
            self.steps,
            self.snapshot.timestamp,
            self.snapshot.net_worth(),
            self.snapshot.cash
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{
        AssetClass, ColumnSchema, Dataset, DatasetMetadata, DatasetType, Resolution,
    };
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    /// Trade dataset of two assets with the given price rows
    pub(crate) fn feeder(prices: &[[f32; 2]]) -> StaticDataFeeder {
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        let symbols = vec!["AAA".to_string(), "BBB".to_string()];
        let column_schema = ColumnSchema::build(DatasetType::Trade, &symbols);
        let n = prices.len();
        StaticDataFeeder::new(Arc::new(Dataset {
            metadata: DatasetMetadata {
                dataset_types: vec![DatasetType::Trade],
                n_columns: column_schema.len(),
                column_schema,
                asset_class: AssetClass::Crypto,
                symbols,
                start,
                end: start + Duration::minutes(n as i64),
                resolution: Resolution::OneMinute,
                n_rows: n,
            },
            timestamps: (0..n).map(|i| start + Duration::minutes(i as i64)).collect(),
            rows: prices.iter().map(|p| vec![p[0], 1.0, p[1], 1.0]).collect(),
        }))
    }

    #[test]
    fn trades_fill_at_row_prices() {
        let mut env = TrainMarketEnv::new(feeder(&[[10.0, 20.0], [12.0, 18.0], [15.0, 15.0]])).unwrap();
        env.reset().unwrap();

        let result = env.step(&[100.0, -200.0]).unwrap();
        assert!(!result.done);
        let snapshot = env.snapshot();
        assert_eq!(snapshot.asset_quantities, vec![10.0, -10.0]);
        assert_eq!(snapshot.cash, DEFAULT_INITIAL_CASH + 100.0);
        // 10 * 12 - 10 * 18
        assert_eq!(snapshot.net_worth(), DEFAULT_INITIAL_CASH + 100.0 - 60.0);

        let result = env.step(&[0.0, 0.0]).unwrap();
        assert!(result.done);
        assert_eq!(result.reward, 0.0);
    }

    #[test]
    fn reset_restores_account() {
        let mut env = TrainMarketEnv::with_account(
            feeder(&[[10.0, 20.0], [12.0, 18.0]]),
            500.0,
            Some(vec![1.0, 0.0]),
        )
        .unwrap();
        env.reset().unwrap();
        env.step(&[50.0, 0.0]).unwrap();
        env.reset().unwrap();

        assert_eq!(env.snapshot().cash, 500.0);
        assert_eq!(env.snapshot().asset_quantities, vec![1.0, 0.0]);
        assert_eq!(env.snapshot().asset_prices, vec![10.0, 20.0]);
    }

    #[test]
    fn wrong_action_length_is_rejected() {
        let mut env = TrainMarketEnv::new(feeder(&[[10.0, 20.0], [12.0, 18.0]])).unwrap();
        env.reset().unwrap();
        assert!(env.step(&[1.0]).is_err());
    }
}
