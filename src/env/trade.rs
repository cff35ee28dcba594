//! Live Trading Environment
//!
//! Synchronous side of the trader. The agent's pipe wraps a `TradeMarketEnv`
//! and runs on a blocking thread; snapshots arrive from the async trader loop
//! and notional actions are sent back to it over tokio channels.

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    snapshot_observation, HoldCounter, MarketEnv, MarketSnapshot, Observation, StepInfo,
    StepResult,
};
use crate::error::{NeuralError, Result};

/// Async end of the channel pair held by the trader loop
pub struct TraderHandle {
    pub snapshots: mpsc::Sender<MarketSnapshot>,
    pub actions: mpsc::Receiver<Vec<f64>>,
}

pub struct TradeMarketEnv {
    snapshots: mpsc::Receiver<MarketSnapshot>,
    actions: mpsc::Sender<Vec<f64>>,
    snapshot: MarketSnapshot,
    holds: HoldCounter,
    n_assets: usize,
}

impl TradeMarketEnv {
    /// Environment and trader handle connected to each other
    pub fn channel(n_assets: usize) -> (Self, TraderHandle) {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(1);
        let (action_tx, action_rx) = mpsc::channel(1);

        let env = Self {
            snapshots: snapshot_rx,
            actions: action_tx,
            snapshot: MarketSnapshot {
                timestamp: chrono::Utc::now(),
                cash: 0.0,
                asset_quantities: vec![0.0; n_assets],
                asset_prices: vec![0.0; n_assets],
                features: Vec::new(),
            },
            holds: HoldCounter::new(n_assets),
            n_assets,
        };
        let handle = TraderHandle {
            snapshots: snapshot_tx,
            actions: action_rx,
        };
        (env, handle)
    }

    fn result(&self, done: bool) -> StepResult {
        StepResult {
            observation: snapshot_observation(&self.snapshot, &self.holds),
            reward: 0.0,
            done,
            truncated: false,
            info: StepInfo {
                timestamp: Some(self.snapshot.timestamp),
                net_worth: self.snapshot.net_worth(),
                cash: self.snapshot.cash,
            },
        }
    }
}

impl MarketEnv for TradeMarketEnv {
    /// Blocks until the trader sends the first snapshot
    fn reset(&mut self) -> Result<Observation> {
        let snapshot = self
            .snapshots
            .blocking_recv()
            .ok_or_else(|| NeuralError::ChannelClosed("trader stopped before reset".to_string()))?;

        self.snapshot = snapshot;
        self.holds = HoldCounter::new(self.n_assets);
        Ok(snapshot_observation(&self.snapshot, &self.holds))
    }

    fn step(&mut self, action: &[f64]) -> Result<StepResult> {
        if action.len() != self.n_assets {
            return Err(NeuralError::validation(format!(
                "expected {} actions, got {}",
                self.n_assets,
                action.len()
            )));
        }

        if self.actions.blocking_send(action.to_vec()).is_err() {
            debug!("Trader closed the action channel");
            return Ok(self.result(true));
        }

        match self.snapshots.blocking_recv() {
            Some(snapshot) => {
                let before = std::mem::replace(&mut self.snapshot, snapshot);
                self.holds
                    .update(&before.asset_quantities, &self.snapshot.asset_quantities);
                Ok(self.result(false))
            }
            None => {
                debug!("Trader closed the snapshot channel");
                Ok(self.result(true))
            }
        }
    }

    fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }

    fn n_assets(&self) -> usize {
        self.n_assets
    }

    fn render(&mut self) {
        info!(
            "{} | net worth {:.2} | cash {:.2} | longs {:.2} | shorts {:.2}",
            self.snapshot.timestamp,
            self.snapshot.net_worth(),
            self.snapshot.cash,
            self.snapshot.longs(),
            self.snapshot.shorts()
        );
    }
}
