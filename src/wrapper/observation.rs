//! Observation Wrappers

use std::collections::VecDeque;

use super::stats::{lock, SharedStatistics, NORMALIZER_CLIP};
use crate::env::{MarketEnv, Observation, StepResult, Wrapper};
use crate::error::{NeuralError, Result};

/// Dict observations become one vector, keys in order
pub struct FlattenToVectorObservationWrapper {
    env: Box<dyn MarketEnv>,
}

impl FlattenToVectorObservationWrapper {
    pub fn new(env: Box<dyn MarketEnv>) -> Self {
        Self { env }
    }
}

impl Wrapper for FlattenToVectorObservationWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        Ok(Observation::Vector(observation.into_vector()))
    }

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        let observation = std::mem::replace(&mut result.observation, Observation::Vector(Vec::new()));
        result.observation = Observation::Vector(observation.into_vector());
        Ok(result)
    }
}

/// Keeps the last `buffer_size` vectors and emits them oldest first.
/// On reset the buffer is filled with the first observation.
pub struct ObservationBufferWrapper {
    env: Box<dyn MarketEnv>,
    buffer_size: usize,
    buffer: VecDeque<Vec<f32>>,
}

impl ObservationBufferWrapper {
    pub fn new(env: Box<dyn MarketEnv>, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(NeuralError::validation("buffer size must be at least 1"));
        }
        Ok(Self {
            env,
            buffer_size,
            buffer: VecDeque::with_capacity(buffer_size),
        })
    }

    fn emit(&self) -> Observation {
        Observation::Vector(self.buffer.iter().flatten().copied().collect())
    }
}

impl Wrapper for ObservationBufferWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        let first = observation.into_vector();
        self.buffer.clear();
        for _ in 0..self.buffer_size {
            self.buffer.push_back(first.clone());
        }
        Ok(self.emit())
    }

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        let latest = std::mem::replace(&mut result.observation, Observation::Vector(Vec::new()));
        if self.buffer.len() == self.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(latest.into_vector());
        result.observation = self.emit();
        Ok(result)
    }
}

/// Concatenates the most recent `stack_size` buffered vectors
pub struct ObservationStackerWrapper {
    env: Box<dyn MarketEnv>,
    buffer_size: usize,
    stack_size: usize,
}

impl ObservationStackerWrapper {
    /// `stack_size` defaults to the whole buffer
    pub fn new(env: Box<dyn MarketEnv>, buffer_size: usize, stack_size: Option<usize>) -> Result<Self> {
        let stack_size = stack_size.unwrap_or(buffer_size);
        if stack_size == 0 || stack_size > buffer_size {
            return Err(NeuralError::validation(format!(
                "stack size {} must be within 1..={}",
                stack_size, buffer_size
            )));
        }
        Ok(Self {
            env,
            buffer_size,
            stack_size,
        })
    }

    fn stack(&self, observation: Observation) -> Result<Observation> {
        let buffered = observation.into_vector();
        if buffered.len() % self.buffer_size != 0 {
            return Err(NeuralError::InvalidState(format!(
                "buffered observation of length {} does not hold {} vectors",
                buffered.len(),
                self.buffer_size
            )));
        }
        let dim = buffered.len() / self.buffer_size;
        let skip = (self.buffer_size - self.stack_size) * dim;
        Ok(Observation::Vector(buffered[skip..].to_vec()))
    }
}

impl Wrapper for ObservationStackerWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        self.stack(observation)
    }

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        let observation = std::mem::replace(&mut result.observation, Observation::Vector(Vec::new()));
        result.observation = self.stack(observation)?;
        Ok(result)
    }
}

/// Normalizes with running statistics, optionally updating them
pub struct ObservationNormalizerWrapper {
    env: Box<dyn MarketEnv>,
    statistics: SharedStatistics,
    track_statistics: bool,
}

impl ObservationNormalizerWrapper {
    pub fn new(env: Box<dyn MarketEnv>, statistics: SharedStatistics, track_statistics: bool) -> Self {
        Self {
            env,
            statistics,
            track_statistics,
        }
    }

    fn normalize(&self, observation: Observation) -> Result<Observation> {
        let sample: Vec<f64> = observation.into_vector().into_iter().map(f64::from).collect();
        let mut statistics = lock(&self.statistics);
        if self.track_statistics {
            statistics.update(&sample)?;
        }
        Ok(Observation::Vector(
            statistics
                .normalize(&sample, NORMALIZER_CLIP)
                .into_iter()
                .map(|v| v as f32)
                .collect(),
        ))
    }
}

impl Wrapper for ObservationNormalizerWrapper {
    delegate_inner!();

    fn on_reset(&mut self, observation: Observation) -> Result<Observation> {
        self.normalize(observation)
    }

    fn on_step(&mut self, mut result: StepResult) -> Result<StepResult> {
        let observation = std::mem::replace(&mut result.observation, Observation::Vector(Vec::new()));
        result.observation = self.normalize(observation)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::train::tests::feeder;
    use crate::env::TrainMarketEnv;
    use crate::wrapper::stats::{shared, RunningStatistics};

    fn base() -> Box<dyn MarketEnv> {
        Box::new(TrainMarketEnv::new(feeder(&[[10.0, 20.0], [11.0, 21.0], [12.0, 22.0]])).unwrap())
    }

    // asset_quantities(2) + cash(1) + features(4) + holds(2)
    const DIM: usize = 9;

    #[test]
    fn buffer_and_stack_keep_latest_vectors() {
        let env = FlattenToVectorObservationWrapper::new(base());
        let env = ObservationBufferWrapper::new(Box::new(env), 3).unwrap();
        let mut env = ObservationStackerWrapper::new(Box::new(env), 3, Some(2)).unwrap();

        let first = env.reset().unwrap().into_vector();
        assert_eq!(first.len(), 2 * DIM);
        assert_eq!(first[..DIM], first[DIM..]);

        let next = env.step(&[0.0, 0.0]).unwrap().observation.into_vector();
        // features start after quantities and cash; the newest vector is last
        assert_eq!(next[3], 10.0);
        assert_eq!(next[DIM + 3], 11.0);
    }

    #[test]
    fn stack_cannot_exceed_buffer() {
        assert!(ObservationStackerWrapper::new(base(), 2, Some(3)).is_err());
    }

    #[test]
    fn normalizer_shares_statistics() {
        let statistics = shared(RunningStatistics::new());
        let env = FlattenToVectorObservationWrapper::new(base());
        let mut env = ObservationNormalizerWrapper::new(Box::new(env), statistics.clone(), true);

        env.reset().unwrap();
        let normalized = env.step(&[0.0, 0.0]).unwrap().observation.into_vector();
        assert_eq!(lock(&statistics).count, 2);
        // the first feature moved from 10 to 11: one standard deviation above the mean
        assert!((normalized[3] - 1.0).abs() < 1e-6);

        let frozen = ObservationNormalizerWrapper::new(base(), statistics.clone(), false);
        let mut frozen = FlattenToVectorObservationWrapper::new(Box::new(frozen));
        frozen.reset().unwrap();
        assert_eq!(lock(&statistics).count, 2);
    }
}
