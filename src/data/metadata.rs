//! Dataset Metadata
//!
//! Describes the layout of a feature dataset so training data can be
//! reproduced as a live stream with identical columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AssetClass, DatasetType, Resolution};
use crate::error::{NeuralError, Result};

/// Ordered column names, `SYMBOL:field`, grouped by dataset type then symbol
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub columns: Vec<String>,
}

impl ColumnSchema {
    pub fn build(dataset_type: DatasetType, symbols: &[String]) -> Self {
        let columns = symbols
            .iter()
            .flat_map(|symbol| {
                dataset_type
                    .fields()
                    .iter()
                    .map(move |field| format!("{}:{}", symbol, field))
            })
            .collect();
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, symbol: &str, field: &str) -> Option<usize> {
        let name = format!("{}:{}", symbol, field);
        self.columns.iter().position(|c| *c == name)
    }

    fn concat(&self, other: &ColumnSchema) -> Self {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Self { columns }
    }
}

/// Where an asset's price is read from in a feature row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Column(usize),
    /// Mid of bid and ask columns
    Mid { bid: usize, ask: usize },
}

impl PriceSource {
    pub fn read(&self, row: &[f32]) -> f32 {
        match *self {
            Self::Column(i) => row[i],
            Self::Mid { bid, ask } => (row[bid] + row[ask]) / 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_types: Vec<DatasetType>,
    pub column_schema: ColumnSchema,
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Resolution,
    pub n_rows: usize,
    pub n_columns: usize,
}

impl DatasetMetadata {
    pub fn n_assets(&self) -> usize {
        self.symbols.len()
    }

    /// Concatenate a later time range with the same layout
    pub fn append(&self, other: &DatasetMetadata) -> Result<DatasetMetadata> {
        if self.column_schema != other.column_schema
            || self.symbols != other.symbols
            || self.resolution != other.resolution
            || self.asset_class != other.asset_class
            || self.dataset_types != other.dataset_types
        {
            return Err(NeuralError::validation(
                "cannot append datasets with different layouts",
            ));
        }
        if other.start < self.end {
            return Err(NeuralError::validation(format!(
                "appended data starts at {} before existing end {}",
                other.start, self.end
            )));
        }

        Ok(DatasetMetadata {
            end: other.end,
            n_rows: self.n_rows + other.n_rows,
            ..self.clone()
        })
    }

    /// Combine datasets covering the same rows side by side
    pub fn join(&self, other: &DatasetMetadata) -> Result<DatasetMetadata> {
        if self.symbols != other.symbols
            || self.resolution != other.resolution
            || self.start != other.start
            || self.end != other.end
            || self.n_rows != other.n_rows
        {
            return Err(NeuralError::validation(
                "joined datasets must share symbols, resolution, time range and row count",
            ));
        }
        if other
            .dataset_types
            .iter()
            .any(|t| self.dataset_types.contains(t))
        {
            return Err(NeuralError::validation(
                "joined datasets must not repeat a dataset type",
            ));
        }

        let mut dataset_types = self.dataset_types.clone();
        dataset_types.extend(other.dataset_types.iter().copied());

        Ok(DatasetMetadata {
            dataset_types,
            column_schema: self.column_schema.concat(&other.column_schema),
            n_columns: self.n_columns + other.n_columns,
            ..self.clone()
        })
    }

    /// Price column per symbol; bars win over trades, trades over quotes
    pub fn asset_price_sources(&self) -> Result<Vec<PriceSource>> {
        let schema = &self.column_schema;
        self.symbols
            .iter()
            .map(|symbol| {
                if self.dataset_types.contains(&DatasetType::Bar) {
                    if let Some(i) = schema.index_of(symbol, "close") {
                        return Ok(PriceSource::Column(i));
                    }
                }
                if self.dataset_types.contains(&DatasetType::Trade) {
                    if let Some(i) = schema.index_of(symbol, "price") {
                        return Ok(PriceSource::Column(i));
                    }
                }
                match (
                    schema.index_of(symbol, "bid_price"),
                    schema.index_of(symbol, "ask_price"),
                ) {
                    (Some(bid), Some(ask)) => Ok(PriceSource::Mid { bid, ask }),
                    _ => Err(NeuralError::validation(format!(
                        "no price column for symbol {}",
                        symbol
                    ))),
                }
            })
            .collect()
    }

    pub fn stream(&self) -> StreamMetadata {
        StreamMetadata {
            dataset_types: self.dataset_types.clone(),
            column_schema: self.column_schema.clone(),
            asset_class: self.asset_class,
            symbols: self.symbols.clone(),
            resolution: self.resolution,
        }
    }
}

/// Layout a live data stream must reproduce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub dataset_types: Vec<DatasetType>,
    pub column_schema: ColumnSchema,
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
    pub resolution: Resolution,
}

impl StreamMetadata {
    pub fn n_columns(&self) -> usize {
        self.column_schema.len()
    }
}
