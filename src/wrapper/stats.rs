//! Running Statistics
//!
//! Welford mean and variance per element, used to normalize observations and
//! rewards. Statistics can be shared between a wrapper and the pipe that built
//! it so they survive saving and loading an agent.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{NeuralError, Result};

/// Observations and rewards are clipped to this many standard deviations
pub const NORMALIZER_CLIP: f64 = 10.0;

const EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStatistics {
    pub count: u64,
    pub mean: Vec<f64>,
    /// Population variance
    pub var: Vec<f64>,
}

impl RunningStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Add a sample; the first sample fixes the dimension
    pub fn update(&mut self, sample: &[f64]) -> Result<()> {
        if self.count == 0 {
            self.mean = vec![0.0; sample.len()];
            self.var = vec![0.0; sample.len()];
        } else if self.dim() != sample.len() {
            return Err(NeuralError::validation(format!(
                "sample has {} elements, statistics track {}",
                sample.len(),
                self.dim()
            )));
        }

        self.count += 1;
        let n = self.count as f64;
        for ((x, mean), var) in sample.iter().zip(&mut self.mean).zip(&mut self.var) {
            let delta = x - *mean;
            *mean += delta / n;
            let delta2 = x - *mean;
            *var += (delta * delta2 - *var) / n;
        }
        Ok(())
    }

    pub fn std(&self) -> Vec<f64> {
        self.var.iter().map(|v| v.sqrt().max(EPSILON)).collect()
    }

    /// `(x - mean) / std` clipped to `±clip`; passes through before any update
    pub fn normalize(&self, sample: &[f64], clip: f64) -> Vec<f64> {
        if self.count == 0 || self.dim() != sample.len() {
            return sample.iter().map(|x| x.clamp(-clip, clip)).collect();
        }
        sample
            .iter()
            .zip(&self.mean)
            .zip(self.std())
            .map(|((x, mean), std)| ((x - mean) / std).clamp(-clip, clip))
            .collect()
    }

    /// `x / std` clipped to `±clip`, leaving the mean in place
    pub fn scale(&self, sample: &[f64], clip: f64) -> Vec<f64> {
        if self.count < 2 || self.dim() != sample.len() {
            return sample.iter().map(|x| x.clamp(-clip, clip)).collect();
        }
        sample
            .iter()
            .zip(self.std())
            .map(|(x, std)| (x / std).clamp(-clip, clip))
            .collect()
    }
}

/// Statistics shared by a wrapper and its pipe
pub type SharedStatistics = Arc<Mutex<RunningStatistics>>;

pub fn shared(statistics: RunningStatistics) -> SharedStatistics {
    Arc::new(Mutex::new(statistics))
}

/// Lock, recovering the data if a holder panicked
pub fn lock(statistics: &SharedStatistics) -> MutexGuard<'_, RunningStatistics> {
    statistics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serde adapter storing the current value of shared statistics
pub mod shared_serde {
    use super::*;

    pub fn serialize<S: Serializer>(
        statistics: &SharedStatistics,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        lock(statistics).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<SharedStatistics, D::Error> {
        RunningStatistics::deserialize(deserializer).map(shared)
    }
}
