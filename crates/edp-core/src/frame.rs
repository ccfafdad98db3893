//! The canonical tabular payload
//!
//! Every job produces a [`Frame`] — an ordered column list plus rows of
//! [`Cell`] values — as its warehouse-ready payload. The quality gate, the
//! normalization pass and both sink adapters all operate on this one
//! representation; adapters convert to JSON records (REST sink) or typed
//! binds (SQL sink) at the boundary.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

/// Column holding the metric name (e.g. "Demand", "Generation")
pub const COL_METRIC: &str = "Metric";
/// Column holding the numeric observation
pub const COL_VALUE: &str = "Value";
/// Column holding the product/commodity
pub const COL_PRODUCT: &str = "Product";
/// Column holding the country name / ISO3 code
pub const COL_COUNTRY: &str = "Country";
/// Column holding the observation date
pub const COL_DATE: &str = "Date";
/// Column stamped with the export timestamp
pub const COL_EXPORT_DATE: &str = "Export Date";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("row has {got} cells, frame has {expected} columns")]
    ArityMismatch { expected: usize, got: usize },
}

/// One tabular value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    /// Wall-clock timestamp with the timezone already stripped
    DateTime(NaiveDateTime),
    /// Timezone-aware timestamp; normalization derives a plain [`COL_DATE`]
    /// from it and strips the zone
    Instant(DateTime<Utc>),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical string key used for deduplication and grouping
    ///
    /// Numbers are keyed on their bit pattern so the key is total (no NaN
    /// surprises) and exact.
    pub fn group_key(&self) -> String {
        match self {
            Cell::Null => "∅".to_string(),
            Cell::Text(v) => format!("t:{v}"),
            Cell::Number(v) => format!("n:{:016x}", v.to_bits()),
            Cell::Date(v) => format!("d:{v}"),
            Cell::DateTime(v) => format!("dt:{v}"),
            Cell::Instant(v) => format!("i:{}", v.to_rfc3339()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Text(v) => serde_json::Value::String(v.clone()),
            Cell::Number(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Date(v) => serde_json::Value::String(v.format("%Y-%m-%d").to_string()),
            Cell::DateTime(v) => {
                serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string())
            },
            Cell::Instant(v) => serde_json::Value::String(v.to_rfc3339()),
        }
    }
}

/// Ordered columns + rows of cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), FrameError> {
        if row.len() != self.columns.len() {
            return Err(FrameError::ArityMismatch {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn set_cell(&mut self, row: usize, column_idx: usize, value: Cell) {
        self.rows[row][column_idx] = value;
    }

    /// Add a column filled with `fill`, returning its index; if the column
    /// already exists its index is returned unchanged.
    pub fn add_column(&mut self, name: &str, fill: Cell) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
        self.columns.len() - 1
    }

    /// Distinct non-null text values of a column (empty set when the column
    /// is absent)
    pub fn distinct_text(&self, column: &str) -> BTreeSet<String> {
        let Some(idx) = self.column_index(column) else {
            return BTreeSet::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row[idx].as_text().map(str::to_string))
            .collect()
    }

    pub fn retain_rows<F: FnMut(&[Cell]) -> bool>(&mut self, mut keep: F) {
        self.rows.retain(|row| keep(row));
    }

    /// Mutable visit of every cell in one column
    pub fn map_column<F: FnMut(&mut Cell)>(&mut self, column: &str, mut f: F) {
        if let Some(idx) = self.column_index(column) {
            for row in &mut self.rows {
                f(&mut row[idx]);
            }
        }
    }

    /// Rows rendered as JSON objects for the REST sink
    pub fn to_records(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(name, cell)| (name.clone(), cell.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect()
    }

    /// Composite group key over a subset of column indices
    pub fn row_key(&self, row: &[Cell], indices: &[usize]) -> String {
        let mut key = String::new();
        for &idx in indices {
            key.push_str(&row[idx].group_key());
            key.push('\u{1f}');
        }
        key
    }

    /// Render the frame as CSV (header row included, RFC 4180 quoting)
    pub fn to_csv(&self) -> String {
        fn escape(field: &str) -> String {
            if field.contains(',') || field.contains('"') || field.contains('\n') {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.to_string()
            }
        }

        fn render(cell: &Cell) -> String {
            match cell {
                Cell::Null => String::new(),
                Cell::Text(v) => v.clone(),
                Cell::Number(v) => v.to_string(),
                Cell::Date(v) => v.format("%Y-%m-%d").to_string(),
                Cell::DateTime(v) => v.format("%Y-%m-%dT%H:%M:%S").to_string(),
                Cell::Instant(v) => v.to_rfc3339(),
            }
        }

        let mut out = String::new();
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| escape(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
        for row in &self.rows {
            out.push_str(
                &row.iter()
                    .map(|cell| escape(&render(cell)))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_row_arity() {
        let mut frame = Frame::new(vec!["A", "B"]);
        assert!(frame
            .push_row(vec![Cell::text("x"), Cell::Number(1.0)])
            .is_ok());
        assert!(matches!(
            frame.push_row(vec![Cell::text("x")]),
            Err(FrameError::ArityMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_distinct_text_skips_nulls() {
        let mut frame = Frame::new(vec![COL_METRIC]);
        frame.push_row(vec![Cell::text("Demand")]).unwrap();
        frame.push_row(vec![Cell::Null]).unwrap();
        frame.push_row(vec![Cell::text("Demand")]).unwrap();
        frame.push_row(vec![Cell::text("Generation")]).unwrap();

        let distinct = frame.distinct_text(COL_METRIC);
        assert_eq!(distinct.len(), 2);
        assert!(distinct.contains("Demand"));
        assert!(distinct.contains("Generation"));
    }

    #[test]
    fn test_add_column_idempotent() {
        let mut frame = Frame::new(vec!["A"]);
        frame.push_row(vec![Cell::Number(1.0)]).unwrap();

        let idx = frame.add_column("B", Cell::Null);
        assert_eq!(idx, 1);
        assert_eq!(frame.rows()[0].len(), 2);

        // Adding again is a no-op
        assert_eq!(frame.add_column("B", Cell::Null), 1);
        assert_eq!(frame.columns().len(), 2);
    }

    #[test]
    fn test_to_records() {
        let mut frame = Frame::new(vec!["Country", COL_VALUE]);
        frame
            .push_row(vec![Cell::text("FRA"), Cell::Number(42.5)])
            .unwrap();

        let records = frame.to_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["Country"], "FRA");
        assert_eq!(records[0]["Value"], 42.5);
    }

    #[test]
    fn test_to_csv_quotes_and_renders() {
        let mut frame = Frame::new(vec!["Product", COL_VALUE]);
        frame
            .push_row(vec![Cell::text("Crude, sweet"), Cell::Number(10.5)])
            .unwrap();
        frame.push_row(vec![Cell::Null, Cell::Number(3.0)]).unwrap();

        let csv = frame.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Product,Value");
        assert_eq!(lines[1], "\"Crude, sweet\",10.5");
        assert_eq!(lines[2], ",3");
    }

    #[test]
    fn test_group_key_distinguishes_types() {
        assert_ne!(Cell::text("1").group_key(), Cell::Number(1.0).group_key());
        assert_ne!(Cell::Null.group_key(), Cell::text("").group_key());
        assert_eq!(Cell::Number(2.0).group_key(), Cell::Number(2.0).group_key());
    }
}
