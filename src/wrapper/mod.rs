//! Environment Wrappers
//!
//! Layers stacked around a market environment. Actions applied to the
//! outermost wrapper flow inward; observations and rewards flow outward.

/// `inner`/`inner_mut` for wrappers holding their environment in `env`
macro_rules! delegate_inner {
    () => {
        fn inner(&self) -> &dyn $crate::env::MarketEnv {
            self.env.as_ref()
        }

        fn inner_mut(&mut self) -> &mut dyn $crate::env::MarketEnv {
            self.env.as_mut()
        }
    };
}

pub mod action;
pub mod base;
pub mod observation;
pub mod reward;
pub mod stats;

pub use action::{
    ActionClipperWrapper, DiscreteActionMapper, EquityBasedFixedNonUniformActionParser,
    EquityBasedFixedUniformActionParser, EquityBasedVariableNonUniformActionParser,
    EquityBasedVariableUniformActionParser, ExcessMarginActionWrapper,
    InitialMarginActionWrapper, IntegerAssetQuantityActionWrapper, MinTradeSizeActionWrapper,
    PositionCloseActionWrapper, ShortingActionWrapper,
};
pub use base::{ConsoleTearsheetRenderWrapper, MarginAccountMetaDataWrapper, TearsheetRow};
pub use observation::{
    FlattenToVectorObservationWrapper, ObservationBufferWrapper, ObservationNormalizerWrapper,
    ObservationStackerWrapper,
};
pub use reward::{LiabilityInterestRewardWrapper, RewardGeneratorWrapper, RewardNormalizerWrapper};
pub use stats::{RunningStatistics, SharedStatistics};
