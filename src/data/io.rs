//! Dataset Storage
//!
//! A dataset lives in two files next to each other:
//! `<name>.csv` holds a `timestamp` column followed by the feature columns,
//! `<name>.meta.json` holds the `DatasetMetadata`.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::metadata::DatasetMetadata;
use crate::error::{NeuralError, Result};

/// Feature rows with their timestamps
#[derive(Debug, Clone)]
pub struct Dataset {
    pub metadata: DatasetMetadata,
    pub timestamps: Vec<DateTime<Utc>>,
    pub rows: Vec<Vec<f32>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct DatasetIO;

impl DatasetIO {
    pub fn data_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.csv", name))
    }

    pub fn metadata_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.meta.json", name))
    }

    /// Create the directory if needed and reject paths that are files
    pub fn validate_path(dir: &Path) -> Result<()> {
        if dir.exists() && !dir.is_dir() {
            return Err(NeuralError::validation(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    pub fn exists(dir: &Path, name: &str) -> bool {
        Self::metadata_path(dir, name).exists() && Self::data_path(dir, name).exists()
    }

    /// Write rows, appending to an existing dataset of the same layout.
    /// Returns the metadata now on disk.
    pub fn write(
        dir: &Path,
        name: &str,
        timestamps: &[DateTime<Utc>],
        rows: &[Vec<f32>],
        metadata: &DatasetMetadata,
    ) -> Result<DatasetMetadata> {
        Self::validate_path(dir)?;

        if timestamps.len() != rows.len() || rows.len() != metadata.n_rows {
            return Err(NeuralError::validation(format!(
                "row count mismatch: {} timestamps, {} rows, metadata says {}",
                timestamps.len(),
                rows.len(),
                metadata.n_rows
            )));
        }
        if let Some(row) = rows.iter().find(|r| r.len() != metadata.n_columns) {
            return Err(NeuralError::validation(format!(
                "row has {} columns, metadata says {}",
                row.len(),
                metadata.n_columns
            )));
        }

        let appending = Self::exists(dir, name);
        let combined = if appending {
            Self::read_metadata(dir, name)?.append(metadata)?
        } else {
            metadata.clone()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(appending)
            .write(true)
            .truncate(!appending)
            .open(Self::data_path(dir, name))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !appending {
            let mut header = vec!["timestamp".to_string()];
            header.extend(metadata.column_schema.columns.iter().cloned());
            writer.write_record(&header)?;
        }

        for (timestamp, row) in timestamps.iter().zip(rows) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(timestamp.to_rfc3339());
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        fs::write(
            Self::metadata_path(dir, name),
            serde_json::to_vec_pretty(&combined)?,
        )?;

        debug!(
            "Wrote {} rows to dataset {} ({} total)",
            rows.len(),
            name,
            combined.n_rows
        );
        Ok(combined)
    }

    pub fn read_metadata(dir: &Path, name: &str) -> Result<DatasetMetadata> {
        let raw = fs::read(Self::metadata_path(dir, name))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn read(dir: &Path, name: &str) -> Result<Dataset> {
        let metadata = Self::read_metadata(dir, name)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(Self::data_path(dir, name))?;

        let mut timestamps = Vec::with_capacity(metadata.n_rows);
        let mut rows = Vec::with_capacity(metadata.n_rows);

        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter();
            let timestamp = fields
                .next()
                .ok_or_else(|| NeuralError::validation("empty dataset row"))?;
            let timestamp = DateTime::parse_from_rfc3339(timestamp)
                .map_err(|e| NeuralError::validation(format!("bad timestamp {}: {}", timestamp, e)))?
                .with_timezone(&Utc);

            let row = fields
                .map(|v| {
                    v.parse::<f32>()
                        .map_err(|e| NeuralError::validation(format!("bad value {}: {}", v, e)))
                })
                .collect::<Result<Vec<f32>>>()?;

            timestamps.push(timestamp);
            rows.push(row);
        }

        if rows.len() != metadata.n_rows {
            return Err(NeuralError::validation(format!(
                "dataset {} has {} rows, metadata says {}",
                name,
                rows.len(),
                metadata.n_rows
            )));
        }

        Ok(Dataset {
            metadata,
            timestamps,
            rows,
        })
    }
}
