//! Data Feeders
//!
//! Feeders hand feature rows to market environments: `StaticDataFeeder`
//! replays a dataset read from disk, `StreamDataFeeder` polls the data API for
//! the latest completed interval and produces rows in the same column layout.

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::io::Dataset;
use super::metadata::{DatasetMetadata, StreamMetadata};
use crate::client::{DataClient, DataRequest};
use crate::error::{NeuralError, Result};

/// One feature row and the start of the interval it describes
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub timestamp: DateTime<Utc>,
    pub features: Vec<f32>,
}

/// Replays rows `[start_index, end_index)` of a dataset
#[derive(Debug, Clone)]
pub struct StaticDataFeeder {
    dataset: Arc<Dataset>,
    start_index: usize,
    end_index: usize,
    index: usize,
}

impl StaticDataFeeder {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        let end_index = dataset.len();
        Self {
            dataset,
            start_index: 0,
            end_index,
            index: 0,
        }
    }

    pub fn with_range(dataset: Arc<Dataset>, start_index: usize, end_index: usize) -> Result<Self> {
        if start_index >= end_index || end_index > dataset.len() {
            return Err(NeuralError::validation(format!(
                "invalid row range {}..{} for dataset of {} rows",
                start_index,
                end_index,
                dataset.len()
            )));
        }
        Ok(Self {
            dataset,
            start_index,
            end_index,
            index: start_index,
        })
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.dataset.metadata
    }

    /// Rows this feeder covers
    pub fn n_rows(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn done(&self) -> bool {
        self.index >= self.end_index
    }

    pub fn reset(&mut self) {
        self.index = self.start_index;
    }

    /// Split into `n` contiguous feeders; the last one takes the remainder
    pub fn split(&self, n: usize) -> Result<Vec<StaticDataFeeder>> {
        if n == 0 || n > self.n_rows() {
            return Err(NeuralError::validation(format!(
                "cannot split {} rows into {} feeders",
                self.n_rows(),
                n
            )));
        }

        let chunk = self.n_rows() / n;
        (0..n)
            .map(|i| {
                let start = self.start_index + i * chunk;
                let end = if i + 1 == n {
                    self.end_index
                } else {
                    start + chunk
                };
                Self::with_range(Arc::clone(&self.dataset), start, end)
            })
            .collect()
    }
}

impl Iterator for StaticDataFeeder {
    type Item = FeedRow;

    fn next(&mut self) -> Option<FeedRow> {
        if self.done() {
            return None;
        }
        let row = FeedRow {
            timestamp: self.dataset.timestamps[self.index],
            features: self.dataset.rows[self.index].clone(),
        };
        self.index += 1;
        Some(row)
    }
}

/// Days searched back for the last completed session
const WARMUP_SEARCH_DAYS: i64 = 10;

/// Builds live feature rows matching a dataset's layout
pub struct StreamDataFeeder<C: DataClient> {
    client: Arc<C>,
    metadata: StreamMetadata,
    last_row: Option<Vec<f32>>,
}

impl<C: DataClient> StreamDataFeeder<C> {
    pub fn new(client: Arc<C>, metadata: StreamMetadata) -> Self {
        Self {
            client,
            metadata,
            last_row: None,
        }
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    /// Start of the first request: the open of the last session that closed
    /// by `end`, and never less than a day back. A trader started on a
    /// Monday open or after a holiday still sees the previous session.
    fn warmup_start(&self, end: DateTime<Utc>) -> DateTime<Utc> {
        let day_back = end - Duration::days(1);
        let today = end.date_naive();
        self.metadata
            .asset_class
            .calendar_type()
            .calendar()
            .schedule(today - Duration::days(WARMUP_SEARCH_DAYS), today)
            .into_iter()
            .rev()
            .find(|session| session.end <= end)
            .map_or(day_back, |session| session.start.min(day_back))
    }

    /// Row for the last interval completed before `now`.
    ///
    /// The first call reaches back to the last completed session so every
    /// symbol has a value to start from; later calls only ask for one
    /// interval and carry forward the previous values of symbols that did
    /// not trade.
    pub async fn next_row(&mut self, now: DateTime<Utc>) -> Result<FeedRow> {
        let step = self.metadata.resolution.duration();
        let end = now
            .duration_trunc(step)
            .map_err(|e| NeuralError::validation(format!("cannot align {} to grid: {}", now, e)))?;
        let start = if self.last_row.is_some() {
            end - step
        } else {
            self.warmup_start(end)
        };

        let mut row = Vec::with_capacity(self.metadata.n_columns());
        let mut offset = 0;

        for &dataset_type in &self.metadata.dataset_types {
            let request = DataRequest {
                dataset_type,
                asset_class: self.metadata.asset_class,
                symbols: self.metadata.symbols.clone(),
                resolution: self.metadata.resolution,
                start,
                end,
            };
            let raw = self.client.get_market_data(&request).await?;
            let width = dataset_type.fields().len();

            for symbol in &self.metadata.symbols {
                let latest = raw
                    .records
                    .get(symbol)
                    .and_then(|records| records.iter().filter(|r| r.timestamp < end).last());

                match (latest, &self.last_row) {
                    (Some(record), _) => row.extend(record.values.iter().map(|v| *v as f32)),
                    (None, Some(previous)) => {
                        debug!("No fresh {} for {}, carrying forward", dataset_type, symbol);
                        row.extend_from_slice(&previous[offset..offset + width]);
                    }
                    (None, None) => {
                        warn!("No {} for {} in {} - {}", dataset_type, symbol, start, end);
                        return Err(NeuralError::DataUnavailable(format!(
                            "No {} for {} in {} - {}",
                            dataset_type, symbol, start, end
                        )));
                    }
                }
                offset += width;
            }
        }

        if row.len() != self.metadata.n_columns() {
            return Err(NeuralError::InvalidState(format!(
                "stream row has {} columns, expected {}",
                row.len(),
                self.metadata.n_columns()
            )));
        }

        self.last_row = Some(row.clone());
        Ok(FeedRow {
            timestamp: end - step,
            features: row,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockDataClient, RawDataset, Record};
    use crate::data::{AssetClass, ColumnSchema, DatasetType, Resolution};
    use chrono::TimeZone;

    fn dataset(n: usize) -> Arc<Dataset> {
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        let symbols = vec!["BTC/USD".to_string()];
        let column_schema = ColumnSchema::build(DatasetType::Trade, &symbols);
        Arc::new(Dataset {
            metadata: DatasetMetadata {
                dataset_types: vec![DatasetType::Trade],
                n_columns: column_schema.len(),
                column_schema,
                asset_class: AssetClass::Crypto,
                symbols,
                start,
                end: start + Duration::minutes(n as i64),
                resolution: Resolution::OneMinute,
                n_rows: n,
            },
            timestamps: (0..n).map(|i| start + Duration::minutes(i as i64)).collect(),
            rows: (0..n).map(|i| vec![i as f32, 1.0]).collect(),
        })
    }

    #[test]
    fn static_feeder_replays_and_resets() {
        let mut feeder = StaticDataFeeder::new(dataset(3));
        let prices: Vec<f32> = feeder.by_ref().map(|r| r.features[0]).collect();
        assert_eq!(prices, vec![0.0, 1.0, 2.0]);
        assert!(feeder.done());

        feeder.reset();
        assert_eq!(feeder.next().map(|r| r.features[0]), Some(0.0));
    }

    #[test]
    fn split_covers_all_rows() {
        let feeder = StaticDataFeeder::new(dataset(10));
        let parts = feeder.split(3).unwrap();
        let sizes: Vec<usize> = parts.iter().map(|p| p.n_rows()).collect();
        assert_eq!(sizes, vec![3, 3, 4]);

        let first_of_last = parts[2].clone().next().unwrap();
        assert_eq!(first_of_last.features[0], 6.0);
        assert!(feeder.split(11).is_err());
    }

    #[tokio::test]
    async fn stream_feeder_carries_missing_symbols_forward() {
        let metadata = StreamMetadata {
            dataset_types: vec![DatasetType::Trade],
            column_schema: ColumnSchema::build(
                DatasetType::Trade,
                &["BTC/USD".to_string(), "ETH/USD".to_string()],
            ),
            asset_class: AssetClass::Crypto,
            symbols: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
            resolution: Resolution::OneMinute,
        };

        let mut client = MockDataClient::new();
        let mut calls = 0;
        client.expect_get_market_data().returning(move |request| {
            calls += 1;
            let mut raw = RawDataset::default();
            raw.extend(
                "BTC/USD".to_string(),
                vec![Record {
                    timestamp: request.end - Duration::seconds(10),
                    values: vec![100.0 * calls as f64, 1.0],
                }],
            );
            if calls == 1 {
                raw.extend(
                    "ETH/USD".to_string(),
                    vec![Record {
                        timestamp: request.start,
                        values: vec![7.0, 2.0],
                    }],
                );
            }
            Ok(raw)
        });

        let mut feeder = StreamDataFeeder::new(Arc::new(client), metadata);
        let now = Utc.with_ymd_and_hms(2022, 1, 3, 12, 0, 30).unwrap();

        let first = feeder.next_row(now).await.unwrap();
        assert_eq!(first.features, vec![100.0, 1.0, 7.0, 2.0]);
        assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2022, 1, 3, 11, 59, 0).unwrap());

        let second = feeder.next_row(now + Duration::minutes(1)).await.unwrap();
        assert_eq!(second.features, vec![200.0, 1.0, 7.0, 2.0]);
    }

    #[tokio::test]
    async fn stream_feeder_warms_up_from_the_previous_session() {
        let metadata = StreamMetadata {
            dataset_types: vec![DatasetType::Trade],
            column_schema: ColumnSchema::build(DatasetType::Trade, &["AAPL".to_string()]),
            asset_class: AssetClass::UsEquity,
            symbols: vec!["AAPL".to_string()],
            resolution: Resolution::OneMinute,
        };
        // Friday close trade; nothing traded yet in Monday's first minute
        let last_trade = Utc.with_ymd_and_hms(2022, 1, 7, 20, 59, 0).unwrap();

        let mut client = MockDataClient::new();
        client.expect_get_market_data().returning(move |request| {
            let mut raw = RawDataset::default();
            if request.start <= last_trade && last_trade < request.end {
                raw.extend(
                    "AAPL".to_string(),
                    vec![Record {
                        timestamp: last_trade,
                        values: vec![172.2, 100.0],
                    }],
                );
            }
            Ok(raw)
        });

        let mut feeder = StreamDataFeeder::new(Arc::new(client), metadata);
        let monday_open = Utc.with_ymd_and_hms(2022, 1, 10, 14, 31, 0).unwrap();
        let row = feeder.next_row(monday_open).await.unwrap();
        assert_eq!(row.features, vec![172.2, 100.0]);

        let friday_open = Utc.with_ymd_and_hms(2022, 1, 7, 14, 30, 0).unwrap();
        assert_eq!(feeder.warmup_start(monday_open), friday_open);
    }

    #[test]
    fn warmup_skips_holidays() {
        let metadata = StreamMetadata {
            dataset_types: vec![DatasetType::Trade],
            column_schema: ColumnSchema::build(DatasetType::Trade, &["AAPL".to_string()]),
            asset_class: AssetClass::UsEquity,
            symbols: vec!["AAPL".to_string()],
            resolution: Resolution::OneMinute,
        };
        let feeder = StreamDataFeeder::new(Arc::new(MockDataClient::new()), metadata);

        // Tuesday after Memorial Day reaches back to Friday
        let tuesday = Utc.with_ymd_and_hms(2022, 5, 31, 13, 31, 0).unwrap();
        let friday_open = Utc.with_ymd_and_hms(2022, 5, 27, 13, 30, 0).unwrap();
        assert_eq!(feeder.warmup_start(tuesday), friday_open);
    }

    #[tokio::test]
    async fn stream_feeder_needs_an_initial_value() {
        let metadata = dataset(1).metadata.stream();
        let mut client = MockDataClient::new();
        client
            .expect_get_market_data()
            .returning(|_| Ok(RawDataset::default()));

        let mut feeder = StreamDataFeeder::new(Arc::new(client), metadata);
        let err = feeder.next_row(Utc::now()).await.unwrap_err();
        assert!(matches!(err, NeuralError::DataUnavailable(_)));
    }
}
