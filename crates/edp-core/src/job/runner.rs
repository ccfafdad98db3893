//! The generic pipeline runner
//!
//! Drives one [`PipelineJob`] through the fixed pipeline:
//! sources → parallel download/checksum → staleness filter → transform →
//! normalize → quality gate → dimension registration → upsert → source
//! metadata update.
//!
//! Per-source failures are logged and excluded from the run; gate failures
//! surface to the caller, since they indicate a shape that must not reach
//! the warehouse.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use super::{PipelineJob, StoreStrategy};
use crate::config::AppConfig;
use crate::download::Downloader;
use crate::quality::{check_frame, process_frame, QualityConfig};
use crate::sink::{ApiSink, SqlSink};
use crate::source::{Source, SourceKind};
use edp_common::checksum;

/// Per-run flags
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Fetch sources from the network; when false, checksums are computed
    /// from the local cache instead
    pub download: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { download: true }
    }
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources_total: usize,
    pub sources_failed: usize,
    /// Sources skipped because their content has not changed
    pub sources_skipped: usize,
    pub rows_loaded: usize,
    pub dimension_rows_added: usize,
}

/// Remove sources whose freshly computed checksum equals the
/// warehouse-recorded one (after trimming); unknown codes are brand-new and
/// are kept. Returns the number removed.
pub fn filter_stale_sources(
    sources: &mut Vec<Source>,
    recorded: &HashMap<String, String>,
) -> usize {
    let before = sources.len();
    sources.retain(|source| {
        match (source.checksum.as_deref(), recorded.get(&source.code)) {
            (Some(fresh), Some(known)) => fresh.trim() != known.trim(),
            _ => true,
        }
    });
    before - sources.len()
}

/// Generic orchestrator for source-driven jobs
pub struct JobRunner {
    downloader: Downloader,
    api: ApiSink,
    pool: Option<PgPool>,
    quality: QualityConfig,
}

impl JobRunner {
    pub fn new(config: &AppConfig, quality: QualityConfig) -> Result<Self> {
        let downloader =
            Downloader::new(config.download.clone()).context("Failed to build downloader")?;
        let api = ApiSink::new(config.api.clone()).context("Failed to build API sink")?;
        let pool = config
            .database
            .url
            .as_deref()
            .map(PgPool::connect_lazy)
            .transpose()
            .context("Failed to create database pool")?;

        Ok(Self {
            downloader,
            api,
            pool,
            quality,
        })
    }

    /// Assemble a runner from already-built parts
    pub fn with_parts(
        downloader: Downloader,
        api: ApiSink,
        pool: Option<PgPool>,
        quality: QualityConfig,
    ) -> Self {
        Self {
            downloader,
            api,
            pool,
            quality,
        }
    }

    /// Run one job through the full pipeline
    pub async fn run(&self, job: &dyn PipelineJob, opts: &RunOptions) -> Result<RunReport> {
        let provider = job.provider();
        info!(
            provider = %provider.code,
            job = %job.job_code(),
            full_load = job.full_load(),
            "starting job run"
        );

        let sources = job.sources().await.context("Failed to build source list")?;
        let mut report = RunReport {
            sources_total: sources.len(),
            ..RunReport::default()
        };

        let (mut data_sources, mut complements): (Vec<Source>, Vec<Source>) = sources
            .into_iter()
            .partition(|s| s.kind == SourceKind::Data);

        if opts.download {
            report.sources_failed += self.download_into(&mut data_sources).await;
            report.sources_failed += self.download_into(&mut complements).await;
        } else {
            report.sources_failed += Self::checksum_cached(&mut data_sources).await;
            report.sources_failed += Self::checksum_cached(&mut complements).await;
        }

        let all_codes: Vec<String> = data_sources
            .iter()
            .chain(&complements)
            .map(|s| s.code.clone())
            .collect();
        let recorded = self
            .api
            .recorded_checksums(&all_codes)
            .await
            .context("Failed to look up recorded checksums")?;

        report.sources_skipped = filter_stale_sources(&mut data_sources, &recorded);
        if report.sources_skipped > 0 {
            info!(
                skipped = report.sources_skipped,
                "sources unchanged since last run"
            );
        }

        if data_sources.is_empty() {
            info!("no fresh sources, nothing to load");
            for source in &complements {
                self.api
                    .update_source(source)
                    .await
                    .context("Failed to update source metadata")?;
            }
            return Ok(report);
        }

        let mut frame = job
            .transform(&data_sources)
            .await
            .context("Failed to transform payload")?;

        // Normalize, then gate. A gate failure must surface: invalid shapes
        // never reach the warehouse.
        process_frame(&mut frame, &self.quality)?;
        check_frame(&frame, &self.quality)?;

        self.register_provider(&provider.dimension_row(), &provider.code)
            .await?;

        let new_source_rows: Vec<serde_json::Value> = data_sources
            .iter()
            .chain(&complements)
            .filter(|s| !recorded.contains_key(&s.code))
            .map(|s| s.dimension_row(&provider.code))
            .collect();
        if !new_source_rows.is_empty() {
            self.api
                .insert_dimension_rows("source", &new_source_rows)
                .await
                .context("Failed to register sources")?;
        }

        for (name, rows) in job.dynamic_dimensions(&frame) {
            report.dimension_rows_added += self
                .insert_new_dimension_rows(&name, rows)
                .await
                .with_context(|| format!("Failed to register dimension `{name}`"))?;
        }

        report.rows_loaded = match job.store() {
            StoreStrategy::Api => self
                .api
                .upload_datapoints(&frame)
                .await
                .context("Failed to upload datapoints")?,
            StoreStrategy::DedicatedTable(spec) => {
                let pool = self
                    .pool
                    .clone()
                    .context("Dedicated-table job requires a database pool")?;
                let sink = SqlSink::new(pool, spec)?;
                let written = if job.full_load() {
                    sink.full_reload(&frame).await?
                } else {
                    sink.merge_upsert(&frame).await?
                };
                written as usize
            },
        };

        for source in data_sources.iter().chain(&complements) {
            self.api
                .update_source(source)
                .await
                .context("Failed to update source metadata")?;
        }

        info!(
            rows = report.rows_loaded,
            skipped = report.sources_skipped,
            failed = report.sources_failed,
            "job run complete"
        );
        Ok(report)
    }

    /// Download a source list in parallel and merge the outcomes back,
    /// dropping failed sources. Returns the number of failures.
    async fn download_into(&self, sources: &mut Vec<Source>) -> usize {
        if sources.is_empty() {
            return 0;
        }

        let outcomes = self.downloader.fetch_all(sources).await;

        let mut failed: HashSet<String> = HashSet::new();
        let mut succeeded: HashMap<String, _> = HashMap::new();
        for (code, result) in outcomes {
            match result {
                Ok(outcome) => {
                    succeeded.insert(code, outcome);
                },
                Err(e) => {
                    warn!(source = %code, "download failed, excluding from run: {e}");
                    failed.insert(code);
                },
            }
        }

        sources.retain_mut(|source| {
            if let Some(outcome) = succeeded.get(&source.code) {
                source.apply_outcome(outcome);
                true
            } else {
                !failed.contains(&source.code)
            }
        });

        failed.len()
    }

    /// Checksum already-cached files without downloading; drops sources whose
    /// cache file is unreadable. Returns the number of failures.
    async fn checksum_cached(sources: &mut Vec<Source>) -> usize {
        let mut keep = Vec::with_capacity(sources.len());
        let mut failed = 0;
        for mut source in sources.drain(..) {
            match checksum::compute_file_md5(&source.path).await {
                Ok(digest) => {
                    source.checksum = Some(digest);
                    keep.push(source);
                },
                Err(e) => {
                    warn!(source = %source.code, "cannot checksum cached file: {e}");
                    failed += 1;
                },
            }
        }
        *sources = keep;
        failed
    }

    async fn register_provider(
        &self,
        row: &serde_json::Value,
        code: &str,
    ) -> Result<()> {
        let existing = self
            .api
            .get_dimension("provider", &[("code", code)])
            .await
            .context("Failed to look up provider dimension")?;
        if existing.is_empty() {
            self.api
                .insert_dimension_rows("provider", std::slice::from_ref(row))
                .await
                .context("Failed to register provider")?;
        }
        Ok(())
    }

    /// Insert only the dimension rows whose `code` the sink does not already
    /// know, avoiding duplicate-key submission.
    async fn insert_new_dimension_rows(
        &self,
        name: &str,
        rows: Vec<serde_json::Value>,
    ) -> Result<usize, crate::sink::SinkError> {
        let existing = self.api.get_dimension(name, &[]).await?;
        let known: HashSet<String> = existing
            .iter()
            .filter_map(|r| r.get("code").and_then(|c| c.as_str()))
            .map(str::to_string)
            .collect();

        let fresh: Vec<serde_json::Value> = rows
            .into_iter()
            .filter(|row| {
                row.get("code")
                    .and_then(|c| c.as_str())
                    .map_or(true, |code| !known.contains(code))
            })
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }
        self.api.insert_dimension_rows(name, &fresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_checksum(code: &str, checksum: &str) -> Source {
        let mut source = Source::new(code, "https://example.com/x", "/tmp/x");
        source.checksum = Some(checksum.to_string());
        source
    }

    #[test]
    fn test_filter_stale_sources_removes_matches() {
        let mut sources = vec![
            source_with_checksum("a", "abc"),
            source_with_checksum("b", "def"),
        ];
        let recorded = HashMap::from([("a".to_string(), "abc".to_string())]);

        let removed = filter_stale_sources(&mut sources, &recorded);
        assert_eq!(removed, 1);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].code, "b");
    }

    #[test]
    fn test_filter_stale_sources_keeps_new_codes() {
        let mut sources = vec![source_with_checksum("brand_new", "abc")];
        let recorded = HashMap::new();

        assert_eq!(filter_stale_sources(&mut sources, &recorded), 0);
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_filter_stale_sources_trims_whitespace() {
        let mut sources = vec![source_with_checksum("a", "abc")];
        let recorded = HashMap::from([("a".to_string(), " abc \n".to_string())]);

        assert_eq!(filter_stale_sources(&mut sources, &recorded), 1);
        assert!(sources.is_empty());
    }

    #[test]
    fn test_filter_stale_sources_changed_checksum_kept() {
        let mut sources = vec![source_with_checksum("a", "new_digest")];
        let recorded = HashMap::from([("a".to_string(), "old_digest".to_string())]);

        assert_eq!(filter_stale_sources(&mut sources, &recorded), 0);
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_filter_stale_sources_without_checksum_kept() {
        // Checksum is only meaningful after a download; keep such sources.
        let mut sources = vec![Source::new("a", "https://example.com/x", "/tmp/x")];
        let recorded = HashMap::from([("a".to_string(), "abc".to_string())]);

        assert_eq!(filter_stale_sources(&mut sources, &recorded), 0);
        assert_eq!(sources.len(), 1);
    }
}
