//! Output formatting for `neural` commands.
//!
//! Human-readable tables by default, JSON with `--json`.

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Render rows in the chosen mode
pub fn render_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> Result<String> {
    match mode {
        OutputMode::Table if items.is_empty() => Ok("(no results)".to_string()),
        OutputMode::Table => Ok(Table::new(items).to_string()),
        OutputMode::Json => Ok(serde_json::to_string_pretty(items)?),
    }
}

pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> Result<()> {
    println!("{}", render_items(items, mode)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Tabled)]
    struct Row {
        symbol: String,
        qty: String,
    }

    #[test]
    fn empty_tables_say_so() {
        let rows: Vec<Row> = vec![];
        assert_eq!(render_items(&rows, OutputMode::Table).unwrap(), "(no results)");
    }

    #[test]
    fn renders_table_and_json() {
        let rows = vec![Row {
            symbol: "AAPL".to_string(),
            qty: "3".to_string(),
        }];
        let table = render_items(&rows, OutputMode::Table).unwrap();
        assert!(table.contains("symbol") && table.contains("AAPL"));

        let json = render_items(&rows, OutputMode::Json).unwrap();
        assert!(json.contains("\"qty\": \"3\""));
    }
}
