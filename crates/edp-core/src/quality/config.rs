//! Per-dataset validation vocabulary
//!
//! Loaded from a JSON or YAML file per dataset. The on-disk format for flow
//! rules mirrors the warehouse configuration: a list of allowed values where
//! the literal `"ALL"` means "no restriction" and a `null` entry means "the
//! flow column may be entirely absent for this metric".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};

/// Default lower clamp for the `Value` column
pub const DEFAULT_MIN_LIMIT: f64 = -30_000.0;
/// Default upper clamp for the `Value` column
pub const DEFAULT_MAX_LIMIT: f64 = 1_000_000.0;

/// Allowed values of one flow column for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub enum FlowRule {
    /// The `"ALL"` sentinel: any value is allowed
    All,
    OneOf {
        values: BTreeSet<String>,
        /// The flow column may be entirely absent for this metric
        allow_absent: bool,
    },
}

impl FlowRule {
    pub fn allows_absent_column(&self) -> bool {
        match self {
            FlowRule::All => true,
            FlowRule::OneOf { allow_absent, .. } => *allow_absent,
        }
    }

    pub fn allows_value(&self, value: &str) -> bool {
        match self {
            FlowRule::All => true,
            FlowRule::OneOf { values, .. } => values.contains(value),
        }
    }
}

impl From<Vec<Option<String>>> for FlowRule {
    fn from(entries: Vec<Option<String>>) -> Self {
        let allow_absent = entries.iter().any(Option::is_none);
        let values: BTreeSet<String> = entries.into_iter().flatten().collect();
        if values.contains("ALL") {
            FlowRule::All
        } else {
            FlowRule::OneOf {
                values,
                allow_absent,
            }
        }
    }
}

impl From<FlowRule> for Vec<Option<String>> {
    fn from(rule: FlowRule) -> Self {
        match rule {
            FlowRule::All => vec![Some("ALL".to_string())],
            FlowRule::OneOf {
                values,
                allow_absent,
            } => {
                let mut entries: Vec<Option<String>> = values.into_iter().map(Some).collect();
                if allow_absent {
                    entries.push(None);
                }
                entries
            },
        }
    }
}

/// The data-driven vocabulary one dataset's payloads are validated against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Every payload column must be one of these
    pub tolerated_columns: BTreeSet<String>,

    /// Columns that must be present in every payload
    pub mandatory_columns: BTreeSet<String>,

    /// Allowed values of the `Metric` column
    pub tolerated_metrics: BTreeSet<String>,

    /// flow-column -> metric -> allowed values
    #[serde(default)]
    pub tolerated_flows: BTreeMap<String, BTreeMap<String, FlowRule>>,

    /// Allowed (mapped) values of the `Country` column; empty = unchecked
    #[serde(default)]
    pub tolerated_countries: BTreeSet<String>,

    /// Country name -> ISO3 mapping applied during normalization
    #[serde(default)]
    pub countries: BTreeMap<String, String>,

    /// Text columns coerced to dates during normalization
    #[serde(default = "default_date_columns")]
    pub date_columns: BTreeSet<String>,

    #[serde(default = "default_min_limit")]
    pub min_limit: f64,

    #[serde(default = "default_max_limit")]
    pub max_limit: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            tolerated_columns: BTreeSet::new(),
            mandatory_columns: BTreeSet::new(),
            tolerated_metrics: BTreeSet::new(),
            tolerated_flows: BTreeMap::new(),
            tolerated_countries: BTreeSet::new(),
            countries: BTreeMap::new(),
            date_columns: default_date_columns(),
            min_limit: DEFAULT_MIN_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

fn default_date_columns() -> BTreeSet<String> {
    BTreeSet::from([crate::frame::COL_DATE.to_string()])
}

fn default_min_limit() -> f64 {
    DEFAULT_MIN_LIMIT
}

fn default_max_limit() -> f64 {
    DEFAULT_MAX_LIMIT
}

impl QualityConfig {
    /// Load a vocabulary file, dispatching on the file extension
    /// (`.yaml`/`.yml` or JSON otherwise).
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read quality config: {}", path.display()))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .with_context(|| format!("Invalid YAML quality config: {}", path.display()))?,
            _ => serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON quality config: {}", path.display()))?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tolerated_columns.is_empty() {
            anyhow::bail!("quality config: tolerated_columns must not be empty");
        }
        for mandatory in &self.mandatory_columns {
            if !self.tolerated_columns.contains(mandatory) {
                anyhow::bail!(
                    "quality config: mandatory column `{mandatory}` is not in tolerated_columns"
                );
            }
        }
        if self.min_limit >= self.max_limit {
            anyhow::bail!(
                "quality config: min_limit ({}) must be below max_limit ({})",
                self.min_limit,
                self.max_limit
            );
        }
        Ok(())
    }
}
