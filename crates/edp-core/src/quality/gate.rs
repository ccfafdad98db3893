//! The validation gate
//!
//! Rejects malformed payloads before they reach a sink. Checks run in a
//! fixed order and each violation surfaces as its own [`QualityError`]
//! variant; gate failures are always fatal for the run's write step.

use thiserror::Error;

use super::config::QualityConfig;
use crate::frame::{Frame, COL_COUNTRY, COL_METRIC, COL_PRODUCT};

#[derive(Debug, Error, PartialEq)]
pub enum QualityError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("column `{0}` is not tolerated")]
    UnknownColumn(String),

    #[error("mandatory column `{0}` is missing")]
    MissingMandatoryColumn(String),

    #[error("metric `{0}` is not tolerated")]
    UnknownMetric(String),

    #[error("flow column `{flow}` is missing for metric `{metric}`")]
    MissingFlowColumn { flow: String, metric: String },

    #[error("value `{value}` is not allowed in flow `{flow}` for metric `{metric}`")]
    FlowViolation {
        flow: String,
        metric: String,
        value: String,
    },

    #[error("column `Product` contains null values")]
    NullProduct,

    #[error("country `{0}` is not tolerated")]
    UnknownCountry(String),

    #[error("country `{0}` cannot be mapped to ISO3")]
    UnmappedCountry(String),

    #[error("column `{column}` contains a non-numeric value")]
    NonNumericValue { column: String },

    #[error("cannot parse `{value}` in date column `{column}`")]
    InvalidDate { column: String, value: String },
}

/// Validate a payload against the dataset vocabulary.
///
/// Check order: non-empty, tolerated columns, mandatory columns, tolerated
/// metrics, flow vocabulary per metric, `Product` non-null, tolerated
/// countries.
pub fn check_frame(frame: &Frame, config: &QualityConfig) -> Result<(), QualityError> {
    // 1. payload must be non-empty
    if frame.is_empty() {
        return Err(QualityError::EmptyPayload);
    }

    // 2. every column must be tolerated
    for column in frame.columns() {
        if !config.tolerated_columns.contains(column) {
            return Err(QualityError::UnknownColumn(column.clone()));
        }
    }

    // 3. every mandatory column must be present
    for mandatory in &config.mandatory_columns {
        if !frame.has_column(mandatory) {
            return Err(QualityError::MissingMandatoryColumn(mandatory.clone()));
        }
    }

    // 4. every distinct metric must be tolerated
    let observed_metrics = frame.distinct_text(COL_METRIC);
    for metric in &observed_metrics {
        if !config.tolerated_metrics.contains(metric) {
            return Err(QualityError::UnknownMetric(metric.clone()));
        }
    }

    // 5. flow vocabulary, per declared flow column, per observed metric.
    // A metric with no rule for a declared flow column is unrestricted
    // on that column.
    for (flow, metric_rules) in &config.tolerated_flows {
        for metric in &observed_metrics {
            let Some(rule) = metric_rules.get(metric) else {
                continue;
            };

            let Some(flow_idx) = frame.column_index(flow) else {
                if !rule.allows_absent_column() {
                    return Err(QualityError::MissingFlowColumn {
                        flow: flow.clone(),
                        metric: metric.clone(),
                    });
                }
                continue;
            };

            let metric_idx = frame
                .column_index(COL_METRIC)
                .ok_or_else(|| QualityError::MissingMandatoryColumn(COL_METRIC.to_string()))?;

            for row in frame.rows() {
                if row[metric_idx].as_text() != Some(metric.as_str()) {
                    continue;
                }
                let cell = &row[flow_idx];
                if cell.is_null() {
                    continue;
                }
                let value = cell.as_text().unwrap_or_default();
                if !rule.allows_value(value) {
                    return Err(QualityError::FlowViolation {
                        flow: flow.clone(),
                        metric: metric.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
    }

    // 6. Product must never be null
    if let Some(product_idx) = frame.column_index(COL_PRODUCT) {
        if frame.rows().iter().any(|row| row[product_idx].is_null()) {
            return Err(QualityError::NullProduct);
        }
    }

    // 7. every (mapped) country must be tolerated, when a vocabulary is given
    if !config.tolerated_countries.is_empty() {
        for country in frame.distinct_text(COL_COUNTRY) {
            if !config.tolerated_countries.contains(&country) {
                return Err(QualityError::UnknownCountry(country));
            }
        }
    }

    Ok(())
}
