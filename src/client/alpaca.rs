//! Alpaca REST adapter (native Rust, no external SDK dependency).
//!
//! Trading endpoints (account, assets, positions, orders) and historical
//! market data endpoints for US equities and crypto.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::types::{
    Account, AccountStatus, Asset, Bar, DataRequest, OrderRequest, OrderResponse, Position, Quote,
    RawDataset, Record, Trade,
};
use super::{DataClient, TradeClient};
use crate::config::AlpacaConfig;
use crate::data::{AssetClass, DatasetType};
use crate::error::{NeuralError, Result};

/// Exchanges an Alpaca asset may list on
pub const ASSET_EXCHANGES: &[&str] = &[
    "AMEX", "ARCA", "BATS", "NYSE", "NASDAQ", "NYSEARCA", "OTC", "CRYPTO",
];

#[derive(Clone)]
pub struct AlpacaClient {
    http: Client,
    trading_url: String,
    data_url: String,
    key: String,
    secret: String,
    stock_feed: String,
    page_limit: u32,
    symbols: Arc<OnceCell<Arc<HashMap<String, Asset>>>>,
}

impl AlpacaClient {
    pub fn new(config: &AlpacaConfig) -> Result<Self> {
        let (key, secret) = config.credentials()?;

        let http = Client::builder()
            .user_agent("neural-alpaca/0.1")
            .build()
            .map_err(NeuralError::Http)?;

        Ok(Self {
            http,
            trading_url: config.trading_url.trim_end_matches('/').to_string(),
            data_url: config.data_url.trim_end_matches('/').to_string(),
            key,
            secret,
            stock_feed: config.stock_feed.clone(),
            page_limit: config.page_limit,
            symbols: Arc::new(OnceCell::new()),
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apca-api-key-id"),
            HeaderValue::from_str(&self.key)
                .map_err(|e| NeuralError::Auth(format!("invalid API key header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("apca-api-secret-key"),
            HeaderValue::from_str(&self.secret)
                .map_err(|e| NeuralError::Auth(format!("invalid API secret header: {}", e)))?,
        );
        Ok(headers)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        query: &[(&str, String)],
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<T> {
        let mut req = self
            .http
            .request(method, &url)
            .headers(self.auth_headers()?);

        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(NeuralError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    async fn get<T: DeserializeOwned>(&self, url: String, query: &[(&str, String)]) -> Result<T> {
        self.request(Method::GET, url, query, None::<&()>).await
    }

    /// Retrieve the account and log whether it is usable for trading
    pub async fn connect(&self) -> Result<Account> {
        let account = self.account().await?;
        info!("Account setup successful.");

        if account.status == AccountStatus::Active {
            info!("Account Status: {:?}", account.status);
        } else {
            warn!("Account Status: {:?}", account.status);
        }

        Ok(account)
    }

    /// All assets available through the API
    pub async fn assets(&self) -> Result<Vec<Asset>> {
        let mut assets: Vec<Asset> = self.symbols().await?.values().cloned().collect();
        assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(assets)
    }

    pub fn exchanges(&self) -> Vec<&'static str> {
        ASSET_EXCHANGES.to_vec()
    }

    pub fn asset_classes(&self) -> Vec<&'static str> {
        AssetClass::all().iter().map(|c| c.as_str()).collect()
    }

    fn market_data_url(&self, request: &DataRequest) -> String {
        match request.asset_class {
            AssetClass::UsEquity => format!(
                "{}/v2/stocks/{}",
                self.data_url,
                request.dataset_type.as_str()
            ),
            AssetClass::Crypto => format!(
                "{}/v1beta3/crypto/us/{}",
                self.data_url,
                request.dataset_type.as_str()
            ),
        }
    }

    fn market_data_query(
        &self,
        request: &DataRequest,
        page_token: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("symbols", request.symbols.join(",")),
            ("start", request.start.to_rfc3339()),
            ("end", request.end.to_rfc3339()),
            ("limit", self.page_limit.to_string()),
        ];

        if request.dataset_type == DatasetType::Bar {
            query.push(("timeframe", request.resolution.as_str().to_string()));
        }
        if request.asset_class == AssetClass::UsEquity {
            query.push(("feed", self.stock_feed.clone()));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }

        query
    }
}

/// Parse one page of `{ "<kind>": { symbol: [...] }, "next_page_token": ... }`
fn parse_page(dataset_type: DatasetType, page: &Value) -> Result<Vec<(String, Vec<Record>)>> {
    let by_symbol = match page.get(dataset_type.as_str()) {
        Some(Value::Object(map)) => map,
        _ => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(by_symbol.len());
    for (symbol, raw) in by_symbol {
        let records: Vec<Record> = match dataset_type {
            DatasetType::Bar => serde_json::from_value::<Vec<Bar>>(raw.clone())?
                .into_iter()
                .map(Record::from)
                .collect(),
            DatasetType::Quote => serde_json::from_value::<Vec<Quote>>(raw.clone())?
                .into_iter()
                .map(Record::from)
                .collect(),
            DatasetType::Trade => serde_json::from_value::<Vec<Trade>>(raw.clone())?
                .into_iter()
                .map(Record::from)
                .collect(),
        };
        out.push((symbol.clone(), records));
    }
    Ok(out)
}

#[async_trait]
impl DataClient for AlpacaClient {
    async fn symbols(&self) -> Result<Arc<HashMap<String, Asset>>> {
        let symbols = self
            .symbols
            .get_or_try_init(|| async {
                let assets: Vec<Asset> = self
                    .get(format!("{}/v2/assets", self.trading_url), &[])
                    .await?;
                debug!("Fetched {} assets", assets.len());
                Ok::<_, NeuralError>(Arc::new(
                    assets
                        .into_iter()
                        .map(|a| (a.symbol.clone(), a))
                        .collect::<HashMap<_, _>>(),
                ))
            })
            .await?;

        Ok(Arc::clone(symbols))
    }

    async fn get_market_data(&self, request: &DataRequest) -> Result<RawDataset> {
        let url = self.market_data_url(request);
        let mut dataset = RawDataset::default();
        let mut page_token: Option<String> = None;

        loop {
            let query = self.market_data_query(request, page_token.as_deref());
            let page: Value = self.get(url.clone(), &query).await?;

            for (symbol, records) in parse_page(request.dataset_type, &page)? {
                dataset.extend(symbol, records);
            }

            page_token = page
                .get("next_page_token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if page_token.is_none() {
                break;
            }
        }

        for records in dataset.records.values_mut() {
            records.sort_by_key(|r| r.timestamp);
        }

        Ok(dataset)
    }
}

#[async_trait]
impl TradeClient for AlpacaClient {
    async fn account(&self) -> Result<Account> {
        self.get(format!("{}/v2/account", self.trading_url), &[])
            .await
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.get(format!("{}/v2/positions", self.trading_url), &[])
            .await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let response: OrderResponse = self
            .request(
                Method::POST,
                format!("{}/v2/orders", self.trading_url),
                &[],
                Some(order),
            )
            .await
            .map_err(|e| match e {
                NeuralError::Api { status, body } => {
                    NeuralError::OrderSubmission(format!("{} ({}): {}", order.symbol, status, body))
                }
                other => other,
            })?;

        info!(
            "Order {} submitted: {} {} {}",
            response.id, order.side, order.qty, order.symbol
        );
        Ok(response)
    }
}
