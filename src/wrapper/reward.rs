//! Reward Wrappers

use chrono::NaiveDate;
use tracing::debug;

use super::stats::{RunningStatistics, NORMALIZER_CLIP};
use crate::env::{MarketEnv, Observation, StepResult, Wrapper};
use crate::error::Result;

/// Default annual interest rate charged on borrowed cash and shorts
pub const DEFAULT_INTEREST_RATE: f64 = 0.08;

/// Reward is the change in net worth over the step
pub struct RewardGeneratorWrapper {
    env: Box<dyn MarketEnv>,
    net_worth: f64,
}

impl RewardGeneratorWrapper {
    pub fn new(env: Box<dyn MarketEnv>) -> Self {
        Self {
            env,
            net_worth: 0.0,
        }
    }
}

impl Wrapper for RewardGeneratorWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        self.net_worth = self.env.snapshot().net_worth();
        Ok(observation)
    }

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        let net_worth = self.env.snapshot().net_worth();
        result.reward = net_worth - self.net_worth;
        self.net_worth = net_worth;
        Ok(result)
    }
}

/// Charges `annual_rate / 360` per elapsed calendar day on debt, where debt is
/// borrowed cash plus the value of short positions
pub struct LiabilityInterestRewardWrapper {
    env: Box<dyn MarketEnv>,
    annual_rate: f64,
    last_date: Option<NaiveDate>,
}

impl LiabilityInterestRewardWrapper {
    pub fn new(env: Box<dyn MarketEnv>, annual_rate: f64) -> Self {
        Self {
            env,
            annual_rate,
            last_date: None,
        }
    }

    fn interest(&mut self) -> f64 {
        let snapshot = self.env.snapshot();
        let date = snapshot.timestamp.date_naive();
        let Some(last_date) = self.last_date.replace(date) else {
            return 0.0;
        };

        let days = (date - last_date).num_days();
        if days <= 0 {
            return 0.0;
        }

        let debt = (-snapshot.cash).max(0.0) + snapshot.shorts();
        let interest = self.annual_rate / 360.0 * days as f64 * debt;
        if interest > 0.0 {
            debug!("Charged {:.2} interest on {:.2} debt for {} days", interest, debt, days);
        }
        interest
    }
}

impl Wrapper for LiabilityInterestRewardWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        self.last_date = Some(self.env.snapshot().timestamp.date_naive());
        Ok(observation)
    }

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        result.reward -= self.interest();
        Ok(result)
    }
}

/// Scales rewards by their running standard deviation
pub struct RewardNormalizerWrapper {
    env: Box<dyn MarketEnv>,
    statistics: RunningStatistics,
}

impl RewardNormalizerWrapper {
    pub fn new(env: Box<dyn MarketEnv>) -> Self {
        Self {
            env,
            statistics: RunningStatistics::new(),
        }
    }
}

impl Wrapper for RewardNormalizerWrapper {
    delegate_inner!();

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        self.statistics.update(&[result.reward])?;
        result.reward = self.statistics.scale(&[result.reward], NORMALIZER_CLIP)[0];
        Ok(result)
    }
}
