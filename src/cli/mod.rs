//! Neural CLI
//!
//! Commands:
//! - `neural account` - Show the brokerage account
//! - `neural assets` - List tradable assets
//! - `neural download` - Download a dataset to disk
//! - `neural train` - Train an agent on a stored dataset
//! - `neural trade` - Trade live with a trained agent

pub mod commands;
pub mod output;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::data::DatasetType;

/// Deep reinforcement learning trading on Alpaca
#[derive(Parser, Debug)]
#[command(name = "neural")]
#[command(author, version, about = "Train and deploy trading agents on Alpaca")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config", env = "NEURAL_CONFIG_DIR")]
    pub config: PathBuf,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show account status and balances
    Account,

    /// List tradable assets
    Assets {
        /// Only this asset class (us_equity, crypto)
        #[arg(long)]
        class: Option<String>,
    },

    /// Download a dataset session by session
    Download {
        /// Comma separated symbols, all of one asset class
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// bars, quotes or trades
        #[arg(long = "type", default_value = "bars")]
        dataset_type: DatasetType,
        #[arg(long, default_value = "1Min")]
        resolution: String,
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Dataset name; existing datasets are appended to
        #[arg(long)]
        name: String,
        /// Defaults to the configured data directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Train an agent on a stored dataset
    Train(TrainArgs),

    /// Trade with a trained agent until Ctrl-C
    Trade {
        #[arg(long)]
        agent_dir: PathBuf,
        /// Log orders instead of submitting them
        #[arg(long)]
        dry_run: bool,
        /// Stop after this many intervals
        #[arg(long)]
        max_intervals: Option<usize>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Dataset name
    #[arg(long)]
    pub dataset: String,
    /// Defaults to the configured data directory
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Where the agent is saved; an existing agent there keeps training
    #[arg(long)]
    pub agent_dir: PathBuf,
    #[arg(long)]
    pub iterations: Option<usize>,
    #[arg(long)]
    pub directions: Option<usize>,
    #[arg(long)]
    pub top_directions: Option<usize>,
    #[arg(long)]
    pub step_size: Option<f64>,
    #[arg(long)]
    pub noise: Option<f64>,
    #[arg(long)]
    pub max_episode_steps: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = crate::env::train::DEFAULT_INITIAL_CASH)]
    pub initial_cash: f64,
}
