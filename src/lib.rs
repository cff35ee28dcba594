pub mod calendar;
pub mod cli;
pub mod client;
pub mod config;
pub mod data;
pub mod env;
pub mod error;
pub mod meta;
pub mod model;
pub mod trade;
pub mod wrapper;

pub use client::{AlpacaClient, DataClient, TradeClient};
pub use config::AppConfig;
pub use data::{AlpacaDataFetcher, Dataset, DatasetIO, DatasetMetadata, StaticDataFeeder, StreamDataFeeder};
pub use env::{MarketEnv, TradeMarketEnv, TrainMarketEnv};
pub use error::{NeuralError, Result};
pub use meta::{Agent, MarginAccountPipe, Pipe};
pub use model::{LinearPolicy, Model, RandomSearchTrainer, TrainConfig};
pub use trade::{Trader, TradingRules};
