//! Agents and the pipes that connect them to market environments

pub mod agent;
pub mod pipe;

pub use agent::{Agent, AGENT_FILE};
pub use pipe::{ActionPipe, HeadActionPipe, MarginAccountPipe, ObservationPipe, Pipe, RewardPipe};
