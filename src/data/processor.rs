//! Data Processing
//!
//! Aligns raw records onto a fixed time grid and fills gaps.

use chrono::{DateTime, Utc};

use super::enums::Resolution;
use crate::client::Record;
use crate::error::{NeuralError, Result};

/// Reindexes raw records and keeps a running density across calls.
///
/// Density is the share of grid slots backed by an observed record, before
/// any filling.
#[derive(Debug, Clone, Default)]
pub struct DataProcessor {
    observed_slots: usize,
    total_slots: usize,
}

impl DataProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running_dataset_density(&self) -> f64 {
        if self.total_slots == 0 {
            return 0.0;
        }
        self.observed_slots as f64 / self.total_slots as f64
    }

    /// Grid timestamps `open, open + r, ...` strictly before `close`
    pub fn time_grid(
        open: DateTime<Utc>,
        close: DateTime<Utc>,
        resolution: Resolution,
    ) -> Vec<DateTime<Utc>> {
        let step = resolution.duration();
        let mut grid = Vec::new();
        let mut t = open;
        while t < close {
            grid.push(t);
            t += step;
        }
        grid
    }

    /// One row per grid slot. A slot takes the last record in
    /// `[slot, slot + r)`; empty slots carry the previous row forward and
    /// leading empties take the first observed row.
    pub fn reindex_and_forward_fill(
        &mut self,
        records: &[Record],
        open: DateTime<Utc>,
        close: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<Vec<f64>>> {
        let grid = Self::time_grid(open, close, resolution);
        let step_secs = resolution.duration().num_seconds();
        let mut slots: Vec<Option<&Vec<f64>>> = vec![None; grid.len()];

        for record in records {
            if record.timestamp < open || record.timestamp >= close {
                continue;
            }
            let index = ((record.timestamp - open).num_seconds() / step_secs) as usize;
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(&record.values);
            }
        }

        let observed = slots.iter().filter(|s| s.is_some()).count();
        self.observed_slots += observed;
        self.total_slots += grid.len();

        let first = slots.iter().flatten().next().ok_or_else(|| {
            NeuralError::DataUnavailable(format!("No data in requested range {}-{}", open, close))
        })?;

        let mut rows = Vec::with_capacity(grid.len());
        let mut last: &Vec<f64> = first;
        for slot in slots {
            if let Some(values) = slot {
                last = values;
            }
            rows.push(last.clone());
        }

        Ok(rows)
    }
}
