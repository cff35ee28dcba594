//! Linear Policy
//!
//! `tanh(W x + b)` trained with augmented random search: perturb the
//! parameters along random Gaussian directions, compare episode returns on
//! both sides, and step along the directions that helped most.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{run_episode, Model, TrainConfig, TrainingReport};
use crate::env::MarketEnv;
use crate::error::{NeuralError, Result};

/// Row-major weights followed by biases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Parameters {
    observation_dim: usize,
    action_dim: usize,
    values: Vec<f64>,
}

impl Parameters {
    fn zeros(observation_dim: usize, action_dim: usize) -> Self {
        Self {
            observation_dim,
            action_dim,
            values: vec![0.0; action_dim * (observation_dim + 1)],
        }
    }

    fn forward(values: &[f64], observation_dim: usize, action_dim: usize, x: &[f32]) -> Vec<f64> {
        let (weights, bias) = values.split_at(action_dim * observation_dim);
        weights
            .chunks(observation_dim.max(1))
            .take(action_dim)
            .zip(bias)
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(x).map(|(w, xi)| w * f64::from(*xi)).sum();
                (z + b).tanh()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearPolicy {
    parameters: Option<Parameters>,
}

impl LinearPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        self.parameters.is_some()
    }

    /// `(observation_dim, action_dim)` once sized
    pub fn dims(&self) -> Option<(usize, usize)> {
        self.parameters
            .as_ref()
            .map(|p| (p.observation_dim, p.action_dim))
    }

    fn ensure_sized(&mut self, observation_dim: usize, action_dim: usize) -> Result<&mut Parameters> {
        let parameters = self
            .parameters
            .get_or_insert_with(|| Parameters::zeros(observation_dim, action_dim));

        if parameters.observation_dim != observation_dim || parameters.action_dim != action_dim {
            return Err(NeuralError::validation(format!(
                "policy expects {} observations and {} actions, environment has {} and {}",
                parameters.observation_dim, parameters.action_dim, observation_dim, action_dim
            )));
        }
        Ok(parameters)
    }
}

impl Model for LinearPolicy {
    fn act(&self, observation: &[f32]) -> Result<Vec<f64>> {
        let parameters = self
            .parameters
            .as_ref()
            .ok_or_else(|| NeuralError::InvalidState("Model is not trained yet.".to_string()))?;

        if observation.len() != parameters.observation_dim {
            return Err(NeuralError::validation(format!(
                "expected observation of length {}, got {}",
                parameters.observation_dim,
                observation.len()
            )));
        }

        Ok(Parameters::forward(
            &parameters.values,
            parameters.observation_dim,
            parameters.action_dim,
            observation,
        ))
    }

    fn train(&mut self, env: &mut dyn MarketEnv, config: &TrainConfig) -> Result<TrainingReport> {
        RandomSearchTrainer::new(config.clone()).train(self, env)
    }
}

/// Augmented random search over a `LinearPolicy`
pub struct RandomSearchTrainer {
    config: TrainConfig,
    rng: StdRng,
}

impl RandomSearchTrainer {
    pub fn new(config: TrainConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    fn validate(&self) -> Result<()> {
        let c = &self.config;
        if c.directions == 0 || c.top_directions == 0 || c.top_directions > c.directions {
            return Err(NeuralError::validation(format!(
                "top directions {} must be within 1..={}",
                c.top_directions, c.directions
            )));
        }
        if c.step_size <= 0.0 || c.noise <= 0.0 {
            return Err(NeuralError::validation(
                "step size and noise must be positive",
            ));
        }
        Ok(())
    }

    fn evaluate(&self, env: &mut dyn MarketEnv, values: &[f64], dims: (usize, usize)) -> Result<f64> {
        let (observation_dim, action_dim) = dims;
        run_episode(env, self.config.max_episode_steps, |x| {
            Ok(Parameters::forward(values, observation_dim, action_dim, x))
        })
    }

    pub fn train(&mut self, policy: &mut LinearPolicy, env: &mut dyn MarketEnv) -> Result<TrainingReport> {
        self.validate()?;

        let observation_dim = env.reset()?.len();
        let action_dim = env.action_size();
        let dims = (observation_dim, action_dim);
        let mut theta = policy.ensure_sized(observation_dim, action_dim)?.values.clone();

        info!(
            "Training linear policy: {} observations -> {} actions, {} iterations",
            observation_dim, action_dim, self.config.iterations
        );

        let mut report = TrainingReport::default();
        for iteration in 0..self.config.iterations {
            let mut rollouts = Vec::with_capacity(self.config.directions);

            for _ in 0..self.config.directions {
                let delta: Vec<f64> = (0..theta.len())
                    .map(|_| StandardNormal.sample(&mut self.rng))
                    .collect();
                let plus: Vec<f64> = theta
                    .iter()
                    .zip(&delta)
                    .map(|(t, d)| t + self.config.noise * d)
                    .collect();
                let minus: Vec<f64> = theta
                    .iter()
                    .zip(&delta)
                    .map(|(t, d)| t - self.config.noise * d)
                    .collect();

                let reward_plus = self.evaluate(env, &plus, dims)?;
                let reward_minus = self.evaluate(env, &minus, dims)?;
                rollouts.push((reward_plus, reward_minus, delta));
            }

            rollouts.sort_by(|a, b| b.0.max(b.1).total_cmp(&a.0.max(a.1)));
            rollouts.truncate(self.config.top_directions);

            let rewards: Vec<f64> = rollouts.iter().flat_map(|(p, m, _)| [*p, *m]).collect();
            let mean = rewards.iter().sum::<f64>() / rewards.len() as f64;
            let std = (rewards.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                / rewards.len() as f64)
                .sqrt();

            if std > 0.0 {
                let scale = self.config.step_size / (rollouts.len() as f64 * std);
                for (reward_plus, reward_minus, delta) in &rollouts {
                    let weight = scale * (reward_plus - reward_minus);
                    for (t, d) in theta.iter_mut().zip(delta) {
                        *t += weight * d;
                    }
                }
            } else {
                debug!("Iteration {}: flat rewards, no update", iteration + 1);
            }

            let episode_return = self.evaluate(env, &theta, dims)?;
            report.episode_returns.push(episode_return);
            report.iterations += 1;

            info!(
                "Iteration {}/{} | return {:.4} | rollout mean {:.4} | rollout std {:.4}",
                iteration + 1,
                self.config.iterations,
                episode_return,
                mean,
                std
            );
        }

        policy.ensure_sized(observation_dim, action_dim)?.values = theta;
        Ok(report)
    }
}
