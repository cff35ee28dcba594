//! Live trader
//!
//! The agent's pipe and model are synchronous, so they run on a blocking
//! thread behind a `TradeMarketEnv`. The async side polls the account and the
//! data stream once per interval, hands a snapshot to the agent, and turns the
//! notional actions it sends back into market orders.

use chrono::Utc;
use rust_decimal::prelude::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::rules::{self, NoRules, TradingRules};
use crate::client::{Asset, DataClient, OrderRequest, OrderResponse, TimeInForce, TradeClient};
use crate::config::TradeConfig;
use crate::data::{PriceSource, StreamDataFeeder};
use crate::env::{MarketEnv, MarketSnapshot, TradeMarketEnv, TraderHandle};
use crate::error::{NeuralError, Result};
use crate::meta::{Agent, Pipe};
use crate::model::Model;

pub struct Trader<T, D, M, P>
where
    T: TradeClient,
    D: DataClient,
{
    trade_client: Arc<T>,
    data_client: Arc<D>,
    agent: Arc<Agent<M, P>>,
    config: TradeConfig,
    time_in_force: TimeInForce,
    rules: Box<dyn TradingRules>,
    interval: Duration,
    max_intervals: Option<usize>,
    dry_run: bool,
}

impl<T, D, M, P> Trader<T, D, M, P>
where
    T: TradeClient + 'static,
    D: DataClient + 'static,
    M: Model + 'static,
    P: Pipe + 'static,
{
    pub fn new(
        trade_client: Arc<T>,
        data_client: Arc<D>,
        agent: Agent<M, P>,
        config: TradeConfig,
    ) -> Result<Self> {
        let time_in_force = config.time_in_force.parse()?;
        let interval = agent
            .dataset_metadata
            .resolution
            .duration()
            .to_std()
            .map_err(|e| NeuralError::validation(format!("invalid trading interval: {}", e)))?;

        Ok(Self {
            trade_client,
            data_client,
            agent: Arc::new(agent),
            config,
            time_in_force,
            rules: Box::new(NoRules),
            interval,
            max_intervals: None,
            dry_run: false,
        })
    }

    pub fn with_rules(mut self, rules: impl TradingRules + 'static) -> Self {
        self.rules = Box::new(rules);
        self
    }

    /// Defaults to the dataset resolution
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop after this many trading intervals
    pub fn with_max_intervals(mut self, max_intervals: usize) -> Self {
        self.max_intervals = Some(max_intervals);
        self
    }

    /// Log orders instead of submitting them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.agent.dataset_metadata.symbols
    }

    /// Broker asset details in the agent's symbol order
    pub async fn assets(&self) -> Result<Vec<Asset>> {
        let known = self.data_client.symbols().await?;
        self.symbols()
            .iter()
            .map(|symbol| {
                known.get(symbol).cloned().ok_or_else(|| {
                    NeuralError::validation(format!("unknown symbol {}", symbol))
                })
            })
            .collect()
    }

    pub async fn check_trade_constraints(&self) -> Result<()> {
        let account = self.trade_client.account().await?;
        rules::check_trade_constraints(&account)
    }

    async fn snapshot(
        &self,
        feeder: &mut StreamDataFeeder<D>,
        price_sources: &[PriceSource],
    ) -> Result<MarketSnapshot> {
        let account = self.trade_client.account().await?;
        let quantities = self.trade_client.asset_quantities(self.symbols()).await?;
        let row = feeder.next_row(Utc::now()).await?;

        Ok(MarketSnapshot {
            timestamp: row.timestamp,
            cash: account.cash.to_f64().unwrap_or_default(),
            asset_quantities: quantities
                .iter()
                .map(|q| q.to_f64().unwrap_or_default())
                .collect(),
            asset_prices: price_sources
                .iter()
                .map(|source| f64::from(source.read(&row.features)))
                .collect(),
            features: row.features,
        })
    }

    /// Quantities to order for each asset after broker limits and filters
    pub async fn order_quantities(
        &self,
        actions: &[f64],
        snapshot: &MarketSnapshot,
        assets: &[Asset],
    ) -> Result<Vec<Decimal>> {
        let held = self.trade_client.asset_quantities(self.symbols()).await?;

        let mut quantities: Vec<Decimal> = actions
            .iter()
            .zip(&snapshot.asset_prices)
            .zip(assets.iter().zip(&held))
            .map(|((notional, price), (asset, held))| {
                rules::order_quantity(
                    *notional,
                    *price,
                    *held,
                    asset,
                    self.config.quantity_precision,
                )
            })
            .collect();

        if !self.config.allow_short {
            quantities = rules::no_short(&quantities, &held);
        }
        if !self.config.allow_margin {
            let account = self.trade_client.account().await?;
            quantities = rules::no_margin(
                &quantities,
                account.cash,
                account.portfolio_value,
                self.config.cash_ratio_threshold,
            );
        }
        Ok(quantities)
    }

    /// Submit market orders for the notional `actions`; zero quantities are skipped
    pub async fn place_orders(
        &self,
        actions: &[f64],
        snapshot: &MarketSnapshot,
        assets: &[Asset],
    ) -> Result<Vec<OrderResponse>> {
        if actions.len() != assets.len() {
            return Err(NeuralError::validation(format!(
                "expected {} actions, got {}",
                assets.len(),
                actions.len()
            )));
        }

        let quantities = self.order_quantities(actions, snapshot, assets).await?;
        let mut responses = Vec::new();

        for (asset, quantity) in assets.iter().zip(quantities) {
            if quantity.is_zero() {
                continue;
            }
            let order = OrderRequest::market(&asset.symbol, quantity, self.time_in_force);

            if self.dry_run {
                info!("[dry run] {} {} {}", order.side, order.qty, order.symbol);
                continue;
            }

            match self.trade_client.place_order(&order).await {
                Ok(response) => {
                    info!(
                        "Order {} {} {} -> {}",
                        order.side, order.qty, order.symbol, response.status
                    );
                    responses.push(response);
                }
                Err(e) => {
                    error!("Order {} {} {} failed: {}", order.side, order.qty, order.symbol, e);
                    return Err(e);
                }
            }
        }
        Ok(responses)
    }

    /// Trade until Ctrl-C, the interval limit, or the agent loop ending
    pub async fn trade(&self) -> Result<()> {
        self.trade_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Trade until `shutdown` resolves, the interval limit, or the agent
    /// loop ending. Shutdown interrupts whatever step is in flight.
    pub async fn trade_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if !self.trade_client.check_connection().await? {
            return Err(NeuralError::Auth("account is not active".to_string()));
        }

        let assets = self.assets().await?;
        let metadata = &self.agent.dataset_metadata;
        let price_sources = metadata.asset_price_sources()?;
        let mut feeder = StreamDataFeeder::new(self.data_client.clone(), metadata.stream());

        let (env, mut handle) = TradeMarketEnv::channel(metadata.n_assets());
        let agent = self.agent.clone();
        let agent_loop = tokio::task::spawn_blocking(move || run_agent(&agent, env));

        info!(
            "Trading {} every {:?}{}",
            self.symbols().join(", "),
            self.interval,
            if self.dry_run { " (dry run)" } else { "" }
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut intervals = 0;
        tokio::pin!(shutdown);

        let outcome: Result<()> = loop {
            if self.max_intervals.is_some_and(|max| intervals >= max) {
                info!("Reached {} trading intervals", intervals);
                break Ok(());
            }

            let interval = async {
                ticker.tick().await;
                self.run_interval(&mut feeder, &price_sources, &assets, &mut handle)
                    .await
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted, stopping trader");
                    break Ok(());
                }
                result = interval => match result {
                    Ok(true) => intervals += 1,
                    Ok(false) => {
                        warn!("Agent loop stopped");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        drop(handle);
        let agent_result = agent_loop
            .await
            .map_err(|e| NeuralError::Other(anyhow::anyhow!("agent loop panicked: {}", e)))?;

        outcome?;
        match agent_result {
            Err(NeuralError::ChannelClosed(reason)) => {
                debug!("Agent loop closed: {}", reason);
                Ok(())
            }
            other => other,
        }
    }

    /// Observe, ask the agent, and order once; false when the agent hung up
    async fn run_interval(
        &self,
        feeder: &mut StreamDataFeeder<D>,
        price_sources: &[PriceSource],
        assets: &[Asset],
        handle: &mut TraderHandle,
    ) -> Result<bool> {
        let snapshot = self.snapshot(feeder, price_sources).await?;
        debug!("Snapshot at {}: net worth {:.2}", snapshot.timestamp, snapshot.net_worth());

        if handle.snapshots.send(snapshot.clone()).await.is_err() {
            return Ok(false);
        }
        let Some(actions) = handle.actions.recv().await else {
            return Ok(false);
        };

        self.check_trade_constraints().await?;
        let actions = self.rules.apply_rules(actions, &snapshot);
        self.place_orders(&actions, &snapshot, assets).await?;
        Ok(true)
    }
}

/// Blocking agent loop: observe, act, step until the trader hangs up
fn run_agent<M: Model, P: Pipe>(agent: &Agent<M, P>, env: TradeMarketEnv) -> Result<()> {
    let mut env = agent.env(Box::new(env))?;
    let mut observation = env.reset()?.into_vector();

    loop {
        let action = agent.model.act(&observation)?;
        let result = env.step(&action)?;
        if result.done {
            return Ok(());
        }
        observation = result.observation.into_vector();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        Account, AccountStatus, AssetStatus, MockDataClient, OrderSide, Position, PositionSide,
        RawDataset, Record,
    };
    use crate::data::AssetClass;
    use crate::env::train::tests::feeder;
    use crate::meta::MarginAccountPipe;
    use crate::model::{TrainConfig, TrainingReport};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeTradeClient {
        account: Account,
        positions: Vec<Position>,
        orders: Mutex<Vec<OrderRequest>>,
    }

    impl FakeTradeClient {
        fn new(cash: Decimal, positions: Vec<Position>) -> Self {
            Self {
                account: Account {
                    id: "acc".to_string(),
                    status: AccountStatus::Active,
                    currency: Some("USD".to_string()),
                    cash,
                    portfolio_value: dec!(100000),
                    equity: dec!(100000),
                    long_market_value: Decimal::ZERO,
                    short_market_value: Decimal::ZERO,
                    buying_power: dec!(100000),
                    pattern_day_trader: false,
                },
                positions,
                orders: Mutex::new(Vec::new()),
            }
        }

        fn orders(&self) -> Vec<OrderRequest> {
            self.orders.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TradeClient for FakeTradeClient {
        async fn account(&self) -> Result<Account> {
            Ok(self.account.clone())
        }

        async fn positions(&self) -> Result<Vec<Position>> {
            Ok(self.positions.clone())
        }

        async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
            self.orders.lock().unwrap().push(order.clone());
            Ok(OrderResponse {
                id: "order".to_string(),
                client_order_id: Some(order.client_order_id.clone()),
                symbol: order.symbol.clone(),
                qty: Some(order.qty),
                filled_qty: None,
                side: order.side,
                status: "accepted".to_string(),
                submitted_at: None,
            })
        }
    }

    /// Buys every asset with full conviction
    #[derive(Debug, Clone)]
    struct AlwaysBuy;

    impl Model for AlwaysBuy {
        fn act(&self, observation: &[f32]) -> Result<Vec<f64>> {
            assert!(!observation.is_empty());
            Ok(vec![1.0; 2])
        }

        fn train(&mut self, _: &mut dyn MarketEnv, _: &TrainConfig) -> Result<TrainingReport> {
            Ok(TrainingReport::default())
        }
    }

    fn asset(symbol: &str) -> Asset {
        Asset {
            id: symbol.to_lowercase(),
            symbol: symbol.to_string(),
            asset_class: AssetClass::Crypto,
            exchange: "CRYPTO".to_string(),
            name: None,
            status: AssetStatus::Active,
            tradable: true,
            marginable: false,
            shortable: false,
            easy_to_borrow: false,
            fractionable: true,
        }
    }

    fn data_client() -> MockDataClient {
        let mut client = MockDataClient::new();
        client.expect_symbols().returning(|| {
            let assets: HashMap<String, Asset> = ["AAA", "BBB"]
                .iter()
                .map(|s| (s.to_string(), asset(s)))
                .collect();
            Ok(Arc::new(assets))
        });
        client.expect_get_market_data().returning(|request| {
            let mut raw = RawDataset::default();
            for symbol in &request.symbols {
                raw.extend(
                    symbol.clone(),
                    vec![Record {
                        timestamp: request.start,
                        values: vec![100.0, 1.0],
                    }],
                );
            }
            Ok(raw)
        });
        client
    }

    /// Buys like `AlwaysBuy` after thinking for a while
    #[derive(Debug, Clone)]
    struct SlowBuy(Duration);

    impl Model for SlowBuy {
        fn act(&self, observation: &[f32]) -> Result<Vec<f64>> {
            std::thread::sleep(self.0);
            AlwaysBuy.act(observation)
        }

        fn train(&mut self, _: &mut dyn MarketEnv, _: &TrainConfig) -> Result<TrainingReport> {
            Ok(TrainingReport::default())
        }
    }

    fn trader_with<M: Model + 'static>(
        trade_client: Arc<FakeTradeClient>,
        model: M,
    ) -> Trader<FakeTradeClient, MockDataClient, M, MarginAccountPipe> {
        let metadata = feeder(&[[100.0, 100.0]]).metadata().clone();
        let agent = Agent::new(model, MarginAccountPipe::default(), metadata);
        Trader::new(trade_client, Arc::new(data_client()), agent, TradeConfig::default())
            .unwrap()
            .with_interval(Duration::from_millis(5))
    }

    fn trader(trade_client: Arc<FakeTradeClient>) -> Trader<FakeTradeClient, MockDataClient, AlwaysBuy, MarginAccountPipe> {
        trader_with(trade_client, AlwaysBuy)
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            timestamp: Utc::now(),
            cash: 100_000.0,
            asset_quantities: vec![0.0, 0.0],
            asset_prices: vec![100.0, 100.0],
            features: vec![100.0, 1.0, 100.0, 1.0],
        }
    }

    #[tokio::test]
    async fn places_rounded_market_orders() {
        let client = Arc::new(FakeTradeClient::new(dec!(100000), vec![]));
        let trader = trader(client.clone());
        let assets = trader.assets().await.unwrap();

        trader
            .place_orders(&[250.0, 0.0], &snapshot(), &assets)
            .await
            .unwrap();

        let orders = client.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "AAA");
        assert_eq!(orders[0].qty, dec!(2.5));
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].time_in_force, TimeInForce::Ioc);
    }

    #[tokio::test]
    async fn filters_shorts_and_margin() {
        let long = Position {
            symbol: "AAA".to_string(),
            qty: dec!(1),
            side: PositionSide::Long,
            market_value: None,
            current_price: None,
            avg_entry_price: None,
        };
        // cash ratio 0.05 is under the 0.1 threshold
        let client = Arc::new(FakeTradeClient::new(dec!(5000), vec![long]));
        let trader = trader(client.clone());
        let assets = trader.assets().await.unwrap();

        let quantities = trader
            .order_quantities(&[-300.0, 300.0], &snapshot(), &assets)
            .await
            .unwrap();
        assert_eq!(quantities, vec![dec!(-1), Decimal::ZERO]);
    }

    #[tokio::test]
    async fn dry_run_submits_nothing() {
        let client = Arc::new(FakeTradeClient::new(dec!(100000), vec![]));
        let trader = trader(client.clone()).dry_run(true);
        let assets = trader.assets().await.unwrap();

        let responses = trader
            .place_orders(&[500.0, 500.0], &snapshot(), &assets)
            .await
            .unwrap();
        assert!(responses.is_empty());
        assert!(client.orders().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trade_loop_buys_each_interval() {
        let client = Arc::new(FakeTradeClient::new(dec!(100000), vec![]));
        let trader = trader(client.clone()).with_max_intervals(2);

        trader.trade().await.unwrap();

        let orders = client.orders();
        assert_eq!(orders.len(), 4);
        assert!(orders.iter().all(|o| o.side == OrderSide::Buy));
        assert_eq!(orders[0].symbol, "AAA");
        assert_eq!(orders[1].symbol, "BBB");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_interrupts_a_pending_step() {
        let client = Arc::new(FakeTradeClient::new(dec!(100000), vec![]));
        let trader = trader_with(client.clone(), SlowBuy(Duration::from_millis(300)));

        trader
            .trade_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        // the agent was still deciding, so nothing reached the broker
        assert!(client.orders().is_empty());
    }

    #[tokio::test]
    async fn pattern_day_trader_needs_equity() {
        let mut fake = FakeTradeClient::new(dec!(1000), vec![]);
        fake.account.pattern_day_trader = true;
        fake.account.portfolio_value = dec!(20000);
        let trader = trader(Arc::new(fake));

        assert!(matches!(
            trader.check_trade_constraints().await,
            Err(NeuralError::TradeConstraintViolation(_))
        ));
    }
}
