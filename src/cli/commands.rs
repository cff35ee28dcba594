//! Command handlers behind the `neural` binary

use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;
use tracing::info;

use super::output::{print_items, OutputMode};
use super::TrainArgs;
use crate::client::{AlpacaClient, Asset};
use crate::config::AppConfig;
use crate::data::{AlpacaDataFetcher, AssetClass, DatasetIO, DatasetType, StaticDataFeeder};
use crate::env::TrainMarketEnv;
use crate::error::{NeuralError, Result};
use crate::meta::{Agent, MarginAccountPipe};
use crate::model::{LinearPolicy, Model, TrainConfig, TrainingReport};
use crate::trade::Trader;

/// Agent type the CLI trains and trades with
pub type DefaultAgent = Agent<LinearPolicy, MarginAccountPipe>;

#[derive(Debug, Serialize, Tabled)]
pub struct AccountRow {
    pub id: String,
    pub status: String,
    pub cash: String,
    pub portfolio_value: String,
    pub long_market_value: String,
    pub short_market_value: String,
    pub buying_power: String,
    pub pattern_day_trader: bool,
}

#[derive(Debug, Serialize, Tabled)]
pub struct AssetRow {
    pub symbol: String,
    pub class: String,
    pub exchange: String,
    pub tradable: bool,
    pub shortable: bool,
    pub fractionable: bool,
}

impl From<&Asset> for AssetRow {
    fn from(asset: &Asset) -> Self {
        Self {
            symbol: asset.symbol.clone(),
            class: asset.asset_class.as_str().to_string(),
            exchange: asset.exchange.clone(),
            tradable: asset.tradable,
            shortable: asset.shortable,
            fractionable: asset.fractionable,
        }
    }
}

pub async fn show_account(config: &AppConfig, mode: OutputMode) -> Result<()> {
    let client = AlpacaClient::new(&config.alpaca)?;
    let account = client.connect().await?;

    print_items(
        &[AccountRow {
            id: account.id,
            status: format!("{:?}", account.status),
            cash: account.cash.to_string(),
            portfolio_value: account.portfolio_value.to_string(),
            long_market_value: account.long_market_value.to_string(),
            short_market_value: account.short_market_value.to_string(),
            buying_power: account.buying_power.to_string(),
            pattern_day_trader: account.pattern_day_trader,
        }],
        mode,
    )
}

pub async fn list_assets(config: &AppConfig, class: Option<&str>, mode: OutputMode) -> Result<()> {
    let class: Option<AssetClass> = class.map(str::parse).transpose()?;
    let client = AlpacaClient::new(&config.alpaca)?;

    let rows: Vec<AssetRow> = client
        .assets()
        .await?
        .iter()
        .filter(|a| a.tradable && class.map_or(true, |c| a.asset_class == c))
        .map(AssetRow::from)
        .collect();

    print_items(&rows, mode)
}

#[allow(clippy::too_many_arguments)]
pub async fn download(
    config: &AppConfig,
    symbols: &[String],
    dataset_type: DatasetType,
    resolution: &str,
    start: NaiveDate,
    end: NaiveDate,
    name: &str,
    dir: Option<&Path>,
) -> Result<()> {
    let dir = dir.map_or_else(|| config.data.dir.clone(), Path::to_path_buf);
    let client = Arc::new(AlpacaClient::new(&config.alpaca)?);
    let fetcher = AlpacaDataFetcher::new(client);

    let metadata = fetcher
        .download_features_to_file(&dir, name, dataset_type, symbols, resolution, start, end)
        .await?;

    info!(
        "Dataset {} holds {} rows x {} columns ({} - {})",
        DatasetIO::data_path(&dir, name).display(),
        metadata.n_rows,
        metadata.n_columns,
        metadata.start,
        metadata.end
    );
    Ok(())
}

impl TrainArgs {
    /// Defaults overridden by whatever flags were given
    pub fn train_config(&self) -> TrainConfig {
        let defaults = TrainConfig::default();
        TrainConfig {
            iterations: self.iterations.unwrap_or(defaults.iterations),
            directions: self.directions.unwrap_or(defaults.directions),
            top_directions: self.top_directions.unwrap_or(defaults.top_directions),
            step_size: self.step_size.unwrap_or(defaults.step_size),
            noise: self.noise.unwrap_or(defaults.noise),
            max_episode_steps: self.max_episode_steps.or(defaults.max_episode_steps),
            seed: self.seed.or(defaults.seed),
        }
    }
}

/// Train a new or previously saved agent on `dir/dataset` and save it
pub fn train(data_dir: &Path, args: &TrainArgs) -> Result<(DefaultAgent, TrainingReport)> {
    let dataset = Arc::new(DatasetIO::read(data_dir, &args.dataset)?);
    info!(
        "Loaded {} rows of {} for {}",
        dataset.len(),
        args.dataset,
        dataset.metadata.symbols.join(", ")
    );

    let mut agent = if DefaultAgent::path(&args.agent_dir).exists() {
        let agent = DefaultAgent::load(&args.agent_dir)?;
        if agent.dataset_metadata.stream() != dataset.metadata.stream() {
            return Err(NeuralError::validation(format!(
                "agent in {} was trained on a dataset with a different layout",
                args.agent_dir.display()
            )));
        }
        info!("Resuming agent from {}", args.agent_dir.display());
        agent
    } else {
        Agent::new(
            LinearPolicy::new(),
            MarginAccountPipe::default(),
            dataset.metadata.clone(),
        )
    };

    let base = TrainMarketEnv::with_account(
        StaticDataFeeder::new(dataset),
        args.initial_cash,
        None,
    )?;
    let mut env = agent.env(Box::new(base))?;
    let report = agent.model.train(env.as_mut(), &args.train_config())?;

    agent.save(&args.agent_dir)?;
    if let (Some(best), Some(last)) = (report.best_return(), report.final_return()) {
        info!("Training done: best return {:.4}, final return {:.4}", best, last);
    }
    Ok((agent, report))
}

pub async fn trade(
    config: &AppConfig,
    agent_dir: &Path,
    dry_run: bool,
    max_intervals: Option<usize>,
) -> Result<()> {
    let mut agent = DefaultAgent::load(agent_dir)?;
    if !agent.model.is_trained() {
        return Err(NeuralError::InvalidState(
            "Model is not trained yet.".to_string(),
        ));
    }
    // live observations must not shift the statistics the model was trained on
    agent.pipe.track_statistics = false;

    let client = Arc::new(AlpacaClient::new(&config.alpaca)?);
    client.connect().await?;

    let mut trader = Trader::new(client.clone(), client, agent, config.trade.clone())?
        .dry_run(dry_run);
    if let Some(max) = max_intervals {
        trader = trader.with_max_intervals(max);
    }
    trader.trade().await
}
