//! Job contracts and orchestration
//!
//! A concrete adapter (one per provider/dataset) implements one of two
//! capability traits and the framework drives everything else:
//!
//! - [`PipelineJob`] — source-driven jobs: declare sources, shape the fetched
//!   payload into a [`Frame`]; the [`runner::JobRunner`] owns download,
//!   staleness filtering, validation and the sink write.
//! - [`bulk::DailyJob`] — day-indexed backfill jobs: extract one calendar day
//!   per call; the [`bulk::BulkRunner`] owns the walk, timeouts and the
//!   error-tolerance budget.
//!
//! Jobs are located through the explicit [`registry::JobRegistry`] keyed by
//! `(provider_code, source_code)`.

pub mod bulk;
pub mod registry;
pub mod runner;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::frame::Frame;
use crate::sink::SqlTableSpec;
use crate::source::Source;

/// The upstream organization a job scrapes, registered as a dimension row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub code: String,
    pub long_name: String,
    pub url: String,
}

impl ProviderInfo {
    pub fn dimension_row(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "long_name": self.long_name,
            "url": self.url,
        })
    }
}

/// Constructor arguments resolved through the registry
#[derive(Debug, Clone, Default)]
pub struct JobParams {
    /// Reprocess the entire available history instead of the latest delta
    pub full_load: bool,
    /// Free-form keyword arguments forwarded to the factory
    pub extras: BTreeMap<String, String>,
}

/// Where fact rows go
#[derive(Debug, Clone)]
pub enum StoreStrategy {
    /// Batched upload through the ingestion API
    Api,
    /// Direct SQL write to a dedicated table pair
    DedicatedTable(SqlTableSpec),
}

/// Contract a source-driven adapter satisfies
///
/// Implementations own only the provider-specific parts: which artifacts to
/// fetch and how to shape them. Everything downstream of `transform` is the
/// framework's responsibility.
#[async_trait]
pub trait PipelineJob: Send + Sync {
    fn provider(&self) -> ProviderInfo;

    /// Source code of this job, unique within the provider
    fn job_code(&self) -> &str;

    /// Fixed at construction; switches the SQL strategy between full reload
    /// and merge upsert
    fn full_load(&self) -> bool {
        false
    }

    fn store(&self) -> StoreStrategy {
        StoreStrategy::Api
    }

    /// Build the source list for this run (data and complement downloads)
    async fn sources(&self) -> anyhow::Result<Vec<Source>>;

    /// Shape the downloaded artifacts into the warehouse payload.
    ///
    /// Only data-bearing sources that survived the staleness filter are
    /// passed in; their `path` points at the downloaded bytes.
    async fn transform(&self, fetched: &[Source]) -> anyhow::Result<Frame>;

    /// Dimension rows discovered at run time, keyed by dimension name,
    /// registered before the fact load
    fn dynamic_dimensions(&self, _frame: &Frame) -> BTreeMap<String, Vec<serde_json::Value>> {
        BTreeMap::new()
    }
}
