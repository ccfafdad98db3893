//! Payload normalization ahead of export
//!
//! Brings a transformed payload into warehouse shape: null/duplicate
//! handling, value clamping, date coercion, timezone stripping, group-sum
//! reconciliation, export stamping and country mapping. Duplicate
//! dimension/timestamp rows are reconciled by summing `Value` — not by
//! last-writer-wins.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use super::config::QualityConfig;
use super::gate::QualityError;
use crate::frame::{Cell, Frame, COL_COUNTRY, COL_DATE, COL_EXPORT_DATE, COL_VALUE};

/// Counters describing what normalization changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub rows_dropped_null: usize,
    pub values_clamped: usize,
    pub duplicates_removed: usize,
    pub groups_merged: usize,
}

/// Normalize a payload in place.
///
/// Steps, in order: drop null-`Value` rows (counted, logged), clamp `Value`
/// into the configured range, coerce date-like text columns, derive a plain
/// `Date` from timezone-aware timestamps and strip the zone, drop exact
/// duplicates, group by every non-`Value` column summing `Value`, stamp
/// `Export Date`, map country names to ISO3.
///
/// Idempotent on already-clean input, modulo the export timestamp.
pub fn process_frame(frame: &mut Frame, config: &QualityConfig) -> Result<ProcessReport, QualityError> {
    let mut report = ProcessReport::default();

    report.rows_dropped_null = drop_null_values(frame);
    if report.rows_dropped_null > 0 {
        info!(
            dropped = report.rows_dropped_null,
            "dropped rows with null values"
        );
    }

    report.values_clamped = clamp_values(frame, config.min_limit, config.max_limit);
    if report.values_clamped > 0 {
        debug!(
            clamped = report.values_clamped,
            min = config.min_limit,
            max = config.max_limit,
            "clamped out-of-range values"
        );
    }

    coerce_date_columns(frame, config)?;
    strip_timezones(frame);

    report.duplicates_removed = drop_exact_duplicates(frame);
    report.groups_merged = group_sum_values(frame)?;

    stamp_export_date(frame, Utc::now());
    map_countries(frame, config)?;

    Ok(report)
}

/// Drop rows whose `Value` is null; returns the number dropped
fn drop_null_values(frame: &mut Frame) -> usize {
    let Some(value_idx) = frame.column_index(COL_VALUE) else {
        return 0;
    };
    let before = frame.len();
    frame.retain_rows(|row| !row[value_idx].is_null());
    before - frame.len()
}

/// Clamp numeric `Value` cells into `[min, max]`; returns the number clamped
fn clamp_values(frame: &mut Frame, min: f64, max: f64) -> usize {
    let mut clamped = 0;
    frame.map_column(COL_VALUE, |cell| {
        if let Cell::Number(v) = cell {
            let bounded = v.clamp(min, max);
            if bounded != *v {
                *cell = Cell::Number(bounded);
                clamped += 1;
            }
        }
    });
    clamped
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    None
}

/// Coerce text cells in the configured date columns to plain dates
fn coerce_date_columns(frame: &mut Frame, config: &QualityConfig) -> Result<(), QualityError> {
    for column in &config.date_columns {
        let Some(idx) = frame.column_index(column) else {
            continue;
        };
        for row_idx in 0..frame.len() {
            let cell = frame.rows()[row_idx][idx].clone();
            if let Cell::Text(text) = cell {
                let date = parse_date(&text).ok_or_else(|| QualityError::InvalidDate {
                    column: column.clone(),
                    value: text.clone(),
                })?;
                frame.set_cell(row_idx, idx, Cell::Date(date));
            }
        }
    }
    Ok(())
}

/// Derive a plain `Date` column from timezone-aware timestamp columns, then
/// strip the timezone from those timestamps
fn strip_timezones(frame: &mut Frame) {
    let aware_columns: Vec<usize> = (0..frame.columns().len())
        .filter(|&idx| {
            frame
                .rows()
                .iter()
                .any(|row| matches!(row[idx], Cell::Instant(_)))
        })
        .collect();

    if aware_columns.is_empty() {
        return;
    }

    let date_idx = frame.add_column(COL_DATE, Cell::Null);
    for col_idx in aware_columns {
        for row_idx in 0..frame.len() {
            if let Cell::Instant(ts) = frame.rows()[row_idx][col_idx] {
                frame.set_cell(row_idx, col_idx, Cell::DateTime(ts.naive_utc()));
                frame.set_cell(row_idx, date_idx, Cell::Date(ts.date_naive()));
            }
        }
    }
}

/// Drop exact-duplicate rows; returns the number removed
fn drop_exact_duplicates(frame: &mut Frame) -> usize {
    let all_columns: Vec<usize> = (0..frame.columns().len()).collect();
    let before = frame.len();

    let mut seen = std::collections::HashSet::new();
    let keys: Vec<String> = frame
        .rows()
        .iter()
        .map(|row| frame.row_key(row, &all_columns))
        .collect();

    let mut key_iter = keys.into_iter();
    frame.retain_rows(|_| {
        // retain_rows visits rows in order, matching the precomputed keys
        let key = key_iter.next().unwrap_or_default();
        seen.insert(key)
    });

    before - frame.len()
}

/// Group by every non-`Value` column and sum `Value`; returns the number of
/// rows merged away
fn group_sum_values(frame: &mut Frame) -> Result<usize, QualityError> {
    let Some(value_idx) = frame.column_index(COL_VALUE) else {
        return Ok(0);
    };

    let group_indices: Vec<usize> = (0..frame.columns().len())
        .filter(|&idx| idx != value_idx)
        .collect();

    let mut grouped: Vec<Vec<Cell>> = Vec::with_capacity(frame.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for row in frame.rows() {
        let value = row[value_idx]
            .as_number()
            .ok_or(QualityError::NonNumericValue {
                column: COL_VALUE.to_string(),
            })?;

        let key = frame.row_key(row, &group_indices);
        match index_by_key.get(&key) {
            Some(&existing) => {
                let current = grouped[existing][value_idx]
                    .as_number()
                    .unwrap_or_default();
                grouped[existing][value_idx] = Cell::Number(current + value);
            },
            None => {
                index_by_key.insert(key, grouped.len());
                grouped.push(row.clone());
            },
        }
    }

    let merged = frame.len() - grouped.len();
    let mut rebuilt = Frame::new(frame.columns().to_vec());
    for row in grouped {
        // Arity is preserved by construction
        let _ = rebuilt.push_row(row);
    }
    *frame = rebuilt;

    Ok(merged)
}

/// Stamp (or restamp) the export timestamp column
fn stamp_export_date(frame: &mut Frame, now: DateTime<Utc>) {
    let idx = frame.add_column(COL_EXPORT_DATE, Cell::Null);
    // The stamp is timezone-stripped so a repeated normalization pass never
    // re-derives `Date` from it.
    let stamp = Cell::DateTime(now.naive_utc());
    for row_idx in 0..frame.len() {
        frame.set_cell(row_idx, idx, stamp.clone());
    }
}

/// Map `Country` names to ISO3 codes; already-mapped codes pass through
fn map_countries(frame: &mut Frame, config: &QualityConfig) -> Result<(), QualityError> {
    let Some(idx) = frame.column_index(COL_COUNTRY) else {
        return Ok(());
    };
    if config.countries.is_empty() {
        return Ok(());
    }

    for row_idx in 0..frame.len() {
        let cell = frame.rows()[row_idx][idx].clone();
        let Cell::Text(name) = cell else {
            continue;
        };

        if let Some(iso3) = config.countries.get(&name) {
            frame.set_cell(row_idx, idx, Cell::text(iso3.clone()));
        } else if !config.countries.values().any(|code| code == &name) {
            return Err(QualityError::UnmappedCountry(name));
        }
    }

    Ok(())
}
