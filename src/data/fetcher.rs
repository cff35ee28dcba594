//! Historical Data Fetcher
//!
//! Validates download requests against the broker's asset list, then pulls
//! raw records one trading session at a time, aligns them onto the resolution
//! grid and appends the result to a dataset on disk.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::enums::{AssetClass, DatasetType, Resolution};
use super::io::DatasetIO;
use super::metadata::{ColumnSchema, DatasetMetadata};
use super::processor::DataProcessor;
use crate::client::{AssetStatus, DataClient, DataRequest, RawDataset};
use crate::error::{NeuralError, Result};

pub struct AlpacaDataFetcher<C: DataClient> {
    client: Arc<C>,
}

impl<C: DataClient> AlpacaDataFetcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub fn validate_resolution(raw: &str) -> Result<Resolution> {
        raw.parse()
    }

    /// Check every symbol is known and tradable; returns their shared asset class
    pub async fn validate_symbols(&self, symbols: &[String]) -> Result<AssetClass> {
        if symbols.is_empty() {
            return Err(NeuralError::validation(
                "symbols argument cannot be an empty sequence.",
            ));
        }

        let mut seen = HashSet::new();
        let duplicates: BTreeSet<&str> = symbols
            .iter()
            .filter(|s| !seen.insert(s.as_str()))
            .map(String::as_str)
            .collect();
        if !duplicates.is_empty() {
            return Err(NeuralError::validation(format!(
                "Symbols {:?} have duplicate values.",
                duplicates
            )));
        }

        let known = self.client.symbols().await?;
        let mut asset_classes = HashSet::new();

        for symbol in symbols {
            let asset = known.get(symbol).ok_or_else(|| {
                NeuralError::validation(format!("Symbol {} is not a known symbol.", symbol))
            })?;

            if !asset.tradable {
                return Err(NeuralError::validation(format!(
                    "Symbol {} is not a tradable symbol.",
                    symbol
                )));
            }
            if asset.status != AssetStatus::Active {
                return Err(NeuralError::validation(format!(
                    "Symbol {} is not an active symbol.",
                    symbol
                )));
            }
            if !asset.fractionable {
                warn!("Symbol {} is not a fractionable symbol.", symbol);
            }
            if !asset.easy_to_borrow {
                warn!("Symbol {} is not easy to borrow (ETB).", symbol);
            }

            asset_classes.insert(asset.asset_class);
        }

        if asset_classes.len() != 1 {
            return Err(NeuralError::validation(
                "Symbols are not of the same asset class.",
            ));
        }

        asset_classes
            .into_iter()
            .next()
            .ok_or_else(|| NeuralError::validation("Symbols are not of the same asset class."))
    }

    pub async fn download_raw_dataset(
        &self,
        dataset_type: DatasetType,
        symbols: &[String],
        asset_class: AssetClass,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawDataset> {
        let request = DataRequest {
            dataset_type,
            asset_class,
            symbols: symbols.to_vec(),
            resolution,
            start,
            end,
        };

        let raw = self.client.get_market_data(&request).await?;
        if raw.is_empty() {
            return Err(NeuralError::DataUnavailable(format!(
                "No data in requested range {}-{}",
                start, end
            )));
        }
        Ok(raw)
    }

    /// Download `[start_date, end_date]` session by session into `dir/name`.
    /// Returns the metadata of the dataset on disk after the last session.
    #[allow(clippy::too_many_arguments)]
    pub async fn download_features_to_file(
        &self,
        dir: &Path,
        name: &str,
        dataset_type: DatasetType,
        symbols: &[String],
        resolution: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<DatasetMetadata> {
        DatasetIO::validate_path(dir)?;

        let asset_class = self.validate_symbols(symbols).await?;
        let resolution = Self::validate_resolution(resolution)?;

        let calendar = asset_class.calendar_type().calendar();
        let schedule = calendar.schedule(start_date, end_date);
        if schedule.is_empty() {
            return Err(NeuralError::validation(
                "No market hours in date range provided.",
            ));
        }

        info!(
            "Downloading dataset for {} symbols | resolution: {} | {} market days from {} to {}",
            symbols.len(),
            resolution,
            schedule.len(),
            start_date,
            end_date
        );

        let column_schema = ColumnSchema::build(dataset_type, symbols);
        let mut processor = DataProcessor::new();
        let mut on_disk = None;

        for (day, session) in schedule.iter().enumerate() {
            let raw = self
                .download_raw_dataset(
                    dataset_type,
                    symbols,
                    asset_class,
                    resolution,
                    session.start,
                    session.end,
                )
                .await?;

            let returned: BTreeSet<&str> = raw.symbols().into_iter().collect();
            let requested: BTreeSet<&str> = symbols.iter().map(String::as_str).collect();
            let missing: Vec<String> = requested
                .difference(&returned)
                .map(|s| s.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(NeuralError::MissingSymbols {
                    symbols: missing,
                    start: session.start.to_rfc3339(),
                    end: session.end.to_rfc3339(),
                });
            }

            // the API does not keep symbol order
            let mut per_symbol = Vec::with_capacity(symbols.len());
            for symbol in symbols {
                let records = raw.records.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
                per_symbol.push(processor.reindex_and_forward_fill(
                    records,
                    session.start,
                    session.end,
                    resolution,
                )?);
            }

            let timestamps = DataProcessor::time_grid(session.start, session.end, resolution);
            let rows: Vec<Vec<f32>> = (0..timestamps.len())
                .map(|i| {
                    per_symbol
                        .iter()
                        .flat_map(|rows| rows[i].iter().map(|v| *v as f32))
                        .collect()
                })
                .collect();

            let metadata = DatasetMetadata {
                dataset_types: vec![dataset_type],
                column_schema: column_schema.clone(),
                asset_class,
                symbols: symbols.to_vec(),
                start: session.start,
                end: session.end,
                resolution,
                n_rows: rows.len(),
                n_columns: column_schema.len(),
            };

            on_disk = Some(DatasetIO::write(dir, name, &timestamps, &rows, &metadata)?);

            info!(
                "[{}/{}] {} | Density: {:.0}%",
                day + 1,
                schedule.len(),
                session.date,
                processor.running_dataset_density() * 100.0
            );
        }

        on_disk.ok_or_else(|| NeuralError::validation("No market hours in date range provided."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Asset, MockDataClient, Record};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn asset(symbol: &str, asset_class: AssetClass) -> Asset {
        Asset {
            id: symbol.to_lowercase(),
            symbol: symbol.to_string(),
            asset_class,
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

    fn client_with_assets() -> MockDataClient {
        let assets: HashMap<String, Asset> = [
            asset("BTC/USD", AssetClass::Crypto),
            asset("ETH/USD", AssetClass::Crypto),
            asset("AAPL", AssetClass::UsEquity),
        ]
        .into_iter()
        .map(|a| (a.symbol.clone(), a))
        .collect();
        let assets = Arc::new(assets);

        let mut client = MockDataClient::new();
        client
            .expect_symbols()
            .returning(move || Ok(Arc::clone(&assets)));
        client
    }

    fn symbols(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn rejects_invalid_symbol_sets() {
        let fetcher = AlpacaDataFetcher::new(Arc::new(client_with_assets()));

        assert!(fetcher.validate_symbols(&[]).await.is_err());

        let err = fetcher
            .validate_symbols(&symbols(&["BTC/USD", "BTC/USD"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = fetcher
            .validate_symbols(&symbols(&["DOGE/USD"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a known symbol"));

        let err = fetcher
            .validate_symbols(&symbols(&["BTC/USD", "AAPL"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("same asset class"));

        let class = fetcher
            .validate_symbols(&symbols(&["ETH/USD", "BTC/USD"]))
            .await
            .unwrap();
        assert_eq!(class, AssetClass::Crypto);
    }

    #[test]
    fn resolution_must_be_accepted() {
        assert!(AlpacaDataFetcher::<MockDataClient>::validate_resolution("1Hour").is_err());
        assert_eq!(
            AlpacaDataFetcher::<MockDataClient>::validate_resolution("30Min").unwrap(),
            Resolution::ThirtyMinutes
        );
    }

    #[tokio::test]
    async fn downloads_sessions_in_caller_symbol_order() {
        let mut client = client_with_assets();
        client.expect_get_market_data().returning(|request| {
            let mut raw = RawDataset::default();
            for (i, symbol) in request.symbols.iter().enumerate() {
                let price = if symbol == "BTC/USD" { 40_000.0 } else { 3_000.0 };
                raw.extend(
                    symbol.clone(),
                    vec![Record {
                        timestamp: request.start + Duration::minutes(i as i64),
                        values: vec![price, 1.0],
                    }],
                );
            }
            Ok(raw)
        });

        let dir = tempfile::tempdir().unwrap();
        let fetcher = AlpacaDataFetcher::new(Arc::new(client));
        let day = NaiveDate::from_ymd_opt(2023, 3, 4).unwrap();
        let metadata = fetcher
            .download_features_to_file(
                dir.path(),
                "crypto",
                DatasetType::Trade,
                &symbols(&["ETH/USD", "BTC/USD"]),
                "30Min",
                day,
                day.succ_opt().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(metadata.n_rows, 2 * 48);
        assert_eq!(metadata.n_columns, 4);
        assert_eq!(metadata.column_schema.columns[0], "ETH/USD:price");
        assert_eq!(
            metadata.end,
            Utc.with_ymd_and_hms(2023, 3, 6, 0, 0, 0).unwrap()
        );

        let dataset = DatasetIO::read(dir.path(), "crypto").unwrap();
        assert_eq!(dataset.rows[0], vec![3_000.0, 1.0, 40_000.0, 1.0]);
    }

    #[tokio::test]
    async fn missing_symbol_fails_the_download() {
        let mut client = client_with_assets();
        client.expect_get_market_data().returning(|request| {
            let mut raw = RawDataset::default();
            raw.extend(
                "BTC/USD".to_string(),
                vec![Record {
                    timestamp: request.start,
                    values: vec![1.0, 1.0],
                }],
            );
            Ok(raw)
        });

        let dir = tempfile::tempdir().unwrap();
        let fetcher = AlpacaDataFetcher::new(Arc::new(client));
        let day = NaiveDate::from_ymd_opt(2023, 3, 4).unwrap();
        let err = fetcher
            .download_features_to_file(
                dir.path(),
                "crypto",
                DatasetType::Trade,
                &symbols(&["BTC/USD", "ETH/USD"]),
                "1Min",
                day,
                day,
            )
            .await
            .unwrap_err();

        match err {
            NeuralError::MissingSymbols { symbols, .. } => assert_eq!(symbols, vec!["ETH/USD"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn extra_symbols_in_the_response_are_ignored() {
        let mut client = client_with_assets();
        client.expect_get_market_data().returning(|request| {
            let mut raw = RawDataset::default();
            for symbol in request.symbols.iter().map(String::as_str).chain(["SOL/USD"]) {
                raw.extend(
                    symbol.to_string(),
                    vec![Record {
                        timestamp: request.start,
                        values: vec![10.0, 1.0],
                    }],
                );
            }
            Ok(raw)
        });

        let dir = tempfile::tempdir().unwrap();
        let fetcher = AlpacaDataFetcher::new(Arc::new(client));
        let day = NaiveDate::from_ymd_opt(2023, 3, 4).unwrap();
        let metadata = fetcher
            .download_features_to_file(
                dir.path(),
                "crypto",
                DatasetType::Trade,
                &symbols(&["BTC/USD"]),
                "30Min",
                day,
                day,
            )
            .await
            .unwrap();

        assert_eq!(metadata.symbols, vec!["BTC/USD"]);
        assert_eq!(metadata.n_columns, 2);
    }
}
