//! Explicit job registry
//!
//! Jobs are located by a `(provider_code, source_code)` key resolved against
//! a registry populated by explicit registration calls at startup — no
//! runtime reflection. Resolution failures carry a descriptive error.

use std::collections::BTreeMap;

use super::bulk::DailyJob;
use super::{JobParams, PipelineJob};
use edp_common::EdpError;

type PipelineFactory = Box<dyn Fn(&JobParams) -> Box<dyn PipelineJob> + Send + Sync>;
type DailyFactory = Box<dyn Fn(&JobParams) -> Box<dyn DailyJob> + Send + Sync>;

enum Factory {
    Pipeline(PipelineFactory),
    Daily(DailyFactory),
}

/// A job instantiated through the registry, one variant per job family
pub enum AnyJob {
    Pipeline(Box<dyn PipelineJob>),
    Daily(Box<dyn DailyJob>),
}

impl std::fmt::Debug for AnyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyJob::Pipeline(_) => f.write_str("AnyJob::Pipeline(..)"),
            AnyJob::Daily(_) => f.write_str("AnyJob::Daily(..)"),
        }
    }
}

/// Startup-time mapping from `(provider_code, source_code)` to constructors
#[derive(Default)]
pub struct JobRegistry {
    factories: BTreeMap<(String, String), Factory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pipeline<F>(&mut self, provider: &str, source: &str, factory: F)
    where
        F: Fn(&JobParams) -> Box<dyn PipelineJob> + Send + Sync + 'static,
    {
        self.factories.insert(
            (provider.to_string(), source.to_string()),
            Factory::Pipeline(Box::new(factory)),
        );
    }

    pub fn register_daily<F>(&mut self, provider: &str, source: &str, factory: F)
    where
        F: Fn(&JobParams) -> Box<dyn DailyJob> + Send + Sync + 'static,
    {
        self.factories.insert(
            (provider.to_string(), source.to_string()),
            Factory::Daily(Box::new(factory)),
        );
    }

    /// Instantiate the job registered under `(provider, source)`
    pub fn create(
        &self,
        provider: &str,
        source: &str,
        params: &JobParams,
    ) -> Result<AnyJob, EdpError> {
        let key = (provider.to_string(), source.to_string());
        match self.factories.get(&key) {
            Some(Factory::Pipeline(factory)) => Ok(AnyJob::Pipeline(factory(params))),
            Some(Factory::Daily(factory)) => Ok(AnyJob::Daily(factory(params))),
            None => Err(EdpError::JobNotFound(format!(
                "no job registered for provider `{provider}`, source `{source}`"
            ))),
        }
    }

    pub fn contains(&self, provider: &str, source: &str) -> bool {
        self.factories
            .contains_key(&(provider.to_string(), source.to_string()))
    }

    /// Registered `(provider, source)` keys, in order
    pub fn keys(&self) -> impl Iterator<Item = &(String, String)> {
        self.factories.keys()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
