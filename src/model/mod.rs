//! Models
//!
//! A model maps flattened observations to raw actions and knows how to
//! train itself against a piped market environment.

pub mod linear;

pub use linear::{LinearPolicy, RandomSearchTrainer};

use serde::{Deserialize, Serialize};

use crate::env::MarketEnv;
use crate::error::Result;

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Parameter updates to run
    pub iterations: usize,
    /// Random directions sampled per iteration
    pub directions: usize,
    /// Best directions kept for the update
    pub top_directions: usize,
    /// Learning rate
    pub step_size: f64,
    /// Exploration noise added along each direction
    pub noise: f64,
    /// Cap on steps per episode; whole dataset when unset
    pub max_episode_steps: Option<usize>,
    /// Seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            directions: 8,
            top_directions: 4,
            step_size: 0.02,
            noise: 0.03,
            max_episode_steps: None,
            seed: None,
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub iterations: usize,
    /// Return of the unperturbed policy after each iteration
    pub episode_returns: Vec<f64>,
}

impl TrainingReport {
    pub fn best_return(&self) -> Option<f64> {
        self.episode_returns.iter().copied().reduce(f64::max)
    }

    pub fn final_return(&self) -> Option<f64> {
        self.episode_returns.last().copied()
    }
}

pub trait Model: Send + Sync {
    /// Raw actions for one flattened observation
    fn act(&self, observation: &[f32]) -> Result<Vec<f64>>;

    fn train(&mut self, env: &mut dyn MarketEnv, config: &TrainConfig) -> Result<TrainingReport>;
}

/// Run one episode with `policy`, returning the summed reward
pub fn run_episode<F>(env: &mut dyn MarketEnv, max_steps: Option<usize>, mut policy: F) -> Result<f64>
where
    F: FnMut(&[f32]) -> Result<Vec<f64>>,
{
    let mut observation = env.reset()?.into_vector();
    let mut total = 0.0;
    let mut steps = 0;

    loop {
        let action = policy(&observation)?;
        let result = env.step(&action)?;
        total += result.reward;
        steps += 1;

        if result.done || result.truncated || max_steps.is_some_and(|max| steps >= max) {
            break;
        }
        observation = result.observation.into_vector();
    }

    Ok(total)
}
