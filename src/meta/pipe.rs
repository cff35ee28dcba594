//! Environment Pipes
//!
//! A pipe is an ordered stack of wrappers applied to a market environment.
//! Pipes are plain serializable configuration; wrapper state that must
//! outlive an episode (observation statistics) is owned by the pipe and
//! shared with the wrapper it builds, so saving the pipe saves that state.

use serde::{Deserialize, Serialize};

use crate::env::MarketEnv;
use crate::error::{NeuralError, Result};
use crate::wrapper::reward::DEFAULT_INTEREST_RATE;
use crate::wrapper::stats::{shared, shared_serde, RunningStatistics, SharedStatistics};
use crate::wrapper::{
    ActionClipperWrapper, ConsoleTearsheetRenderWrapper, DiscreteActionMapper,
    EquityBasedFixedNonUniformActionParser, EquityBasedFixedUniformActionParser,
    EquityBasedVariableNonUniformActionParser, EquityBasedVariableUniformActionParser,
    ExcessMarginActionWrapper, FlattenToVectorObservationWrapper, InitialMarginActionWrapper,
    IntegerAssetQuantityActionWrapper, LiabilityInterestRewardWrapper,
    MarginAccountMetaDataWrapper, MinTradeSizeActionWrapper, ObservationBufferWrapper,
    ObservationNormalizerWrapper, ObservationStackerWrapper, PositionCloseActionWrapper,
    RewardGeneratorWrapper, RewardNormalizerWrapper, ShortingActionWrapper,
};

pub trait Pipe: Send + Sync {
    /// Wrap `env`; the last wrapper applied is the first to receive actions
    fn pipe(&self, env: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>>;
}

/// Net worth change, minus interest on debt, normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardPipe {
    pub interest_rate: f64,
}

impl Default for RewardPipe {
    fn default() -> Self {
        Self {
            interest_rate: DEFAULT_INTEREST_RATE,
        }
    }
}

impl Pipe for RewardPipe {
    fn pipe(&self, env: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>> {
        let env = RewardGeneratorWrapper::new(env);
        let env = LiabilityInterestRewardWrapper::new(Box::new(env), self.interest_rate);
        let env = RewardNormalizerWrapper::new(Box::new(env));
        Ok(Box::new(env))
    }
}

/// Flatten, buffer, stack and normalize observations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationPipe {
    pub buffer_size: usize,
    /// Defaults to the buffer size
    pub stack_size: Option<usize>,
    /// Update the statistics while stepping
    pub track_statistics: bool,
    #[serde(with = "shared_serde")]
    pub statistics: SharedStatistics,
}

impl Default for ObservationPipe {
    fn default() -> Self {
        Self {
            buffer_size: 10,
            stack_size: None,
            track_statistics: true,
            statistics: shared(RunningStatistics::new()),
        }
    }
}

impl Pipe for ObservationPipe {
    fn pipe(&self, env: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>> {
        let env = FlattenToVectorObservationWrapper::new(env);
        let env = ObservationBufferWrapper::new(Box::new(env), self.buffer_size)?;
        let env = ObservationStackerWrapper::new(Box::new(env), self.buffer_size, self.stack_size)?;
        let env = ObservationNormalizerWrapper::new(
            Box::new(env),
            self.statistics.clone(),
            self.track_statistics,
        );
        Ok(Box::new(env))
    }
}

/// Trading logic on notional trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPipe {
    /// Smallest notional worth trading
    pub min_trade: f64,
    /// Trade whole shares only
    pub integer: bool,
}

impl Default for ActionPipe {
    fn default() -> Self {
        Self {
            min_trade: 1.0,
            integer: false,
        }
    }
}

impl Pipe for ActionPipe {
    fn pipe(&self, env: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>> {
        let env = MinTradeSizeActionWrapper::new(env, self.min_trade);
        let env = IntegerAssetQuantityActionWrapper::new(Box::new(env), self.integer);
        let env = PositionCloseActionWrapper::new(Box::new(env));
        let env = ShortingActionWrapper::new(Box::new(env));
        Ok(Box::new(env))
    }
}

/// Parses raw model outputs into notional trades.
///
/// | fixed | uniform | model outputs |
/// |-------|---------|---------------|
/// | yes   | yes     | `n` signals |
/// | no    | yes     | `n` signals + ratio |
/// | yes   | no      | `n` sides + `n` weights |
/// | no    | no      | `n` sides + `n` weights + ratio |
///
/// Discrete models emit indices in `0..=2k` per output and need a uniform
/// budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadActionPipe {
    pub uniform: bool,
    pub fixed: bool,
    pub discrete: bool,
    pub trade_equity_ratio: f64,
    pub hold_threshold: f64,
    pub clip: bool,
    pub low: f64,
    pub high: f64,
    pub discrete_actions_per_side: usize,
}

impl Default for HeadActionPipe {
    fn default() -> Self {
        Self {
            uniform: true,
            fixed: true,
            discrete: false,
            trade_equity_ratio: 0.05,
            hold_threshold: 0.15,
            clip: false,
            low: -1.0,
            high: 1.0,
            discrete_actions_per_side: 1,
        }
    }
}

impl HeadActionPipe {
    pub fn validate(&self) -> Result<()> {
        if self.discrete && !self.uniform {
            return Err(NeuralError::validation(
                "Discrete models can only be used with uniform trading budget distribution.",
            ));
        }
        if self.low > self.high {
            return Err(NeuralError::validation(format!(
                "clip bounds reversed: {} > {}",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

impl Pipe for HeadActionPipe {
    fn pipe(&self, env: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>> {
        self.validate()?;

        let mut env: Box<dyn MarketEnv> = match (self.fixed, self.uniform) {
            (true, true) => Box::new(EquityBasedFixedUniformActionParser::new(
                env,
                self.trade_equity_ratio,
                self.hold_threshold,
            )),
            (false, true) => Box::new(EquityBasedVariableUniformActionParser::new(
                env,
                self.hold_threshold,
            )),
            (true, false) => Box::new(EquityBasedFixedNonUniformActionParser::new(
                env,
                self.trade_equity_ratio,
                self.hold_threshold,
            )),
            (false, false) => Box::new(EquityBasedVariableNonUniformActionParser::new(
                env,
                self.hold_threshold,
            )),
        };

        if self.discrete {
            env = Box::new(DiscreteActionMapper::new(
                env,
                self.discrete_actions_per_side,
                self.hold_threshold,
            )?);
        }
        if self.clip {
            env = Box::new(ActionClipperWrapper::new(env, self.low, self.high));
        }
        Ok(env)
    }
}

/// Margin account simulation with the reward, observation, action and head
/// pipes stacked on top
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginAccountPipe {
    pub trade_equity_ratio: f64,
    pub excess_margin_ratio_threshold: f64,
    pub min_trade: f64,
    pub integer: bool,
    pub buffer_size: usize,
    pub stack_size: Option<usize>,
    pub track_statistics: bool,
    /// Steps between tearsheets
    pub verbosity: usize,
    #[serde(with = "shared_serde")]
    pub observation_statistics: SharedStatistics,
}

impl Default for MarginAccountPipe {
    fn default() -> Self {
        Self {
            trade_equity_ratio: 0.02,
            excess_margin_ratio_threshold: 0.1,
            min_trade: 1.0,
            integer: false,
            buffer_size: 10,
            stack_size: None,
            track_statistics: true,
            verbosity: 20,
            observation_statistics: shared(RunningStatistics::new()),
        }
    }
}

impl MarginAccountPipe {
    fn observation_pipe(&self) -> ObservationPipe {
        ObservationPipe {
            buffer_size: self.buffer_size,
            stack_size: self.stack_size,
            track_statistics: self.track_statistics,
            statistics: self.observation_statistics.clone(),
        }
    }

    fn head(&self) -> HeadActionPipe {
        HeadActionPipe {
            trade_equity_ratio: self.trade_equity_ratio,
            ..HeadActionPipe::default()
        }
    }
}

impl Pipe for MarginAccountPipe {
    fn pipe(&self, env: Box<dyn MarketEnv>) -> Result<Box<dyn MarketEnv>> {
        let env = MarginAccountMetaDataWrapper::new(env);
        let env = ConsoleTearsheetRenderWrapper::new(Box::new(env), self.verbosity);
        let env = InitialMarginActionWrapper::new(Box::new(env), 1.0);
        let env = ExcessMarginActionWrapper::new(Box::new(env), self.excess_margin_ratio_threshold);

        let env = RewardPipe::default().pipe(Box::new(env))?;
        let env = self.observation_pipe().pipe(env)?;
        let env = ActionPipe {
            min_trade: self.min_trade,
            integer: self.integer,
        }
        .pipe(env)?;
        self.head().pipe(env)
    }
}
