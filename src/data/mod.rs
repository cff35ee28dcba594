//! Market Data
//!
//! Downloading, aligning, storing and replaying feature datasets.

mod enums;
pub mod feeder;
pub mod fetcher;
pub mod io;
pub mod metadata;
pub mod processor;

pub use enums::{AssetClass, DatasetType, Resolution};
pub use feeder::{FeedRow, StaticDataFeeder, StreamDataFeeder};
pub use fetcher::AlpacaDataFetcher;
pub use io::{Dataset, DatasetIO};
pub use metadata::{ColumnSchema, DatasetMetadata, PriceSource, StreamMetadata};
pub use processor::DataProcessor;
