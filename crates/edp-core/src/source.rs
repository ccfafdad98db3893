//! Source records and download provenance
//!
//! A [`Source`] describes one fetchable artifact belonging to a job run. The
//! download layer never mutates a `Source` from worker tasks; it returns an
//! explicit [`DownloadOutcome`] which the orchestrator merges back on the
//! coordinating task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether a source carries data or is an auxiliary download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Feeds `transform` and the staleness filter
    #[default]
    Data,
    /// Downloaded and registered (e.g. provider documentation) but never
    /// part of the tabular payload
    Complement,
}

/// One fetchable artifact (file/URL) belonging to a provider/job run
///
/// `code` is unique within a single run; `checksum` is only meaningful after
/// a successful download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique string id within a job run
    pub code: String,
    /// Remote location (http(s):// or ftp://)
    pub url: String,
    /// Local cache location the payload is written to
    pub path: PathBuf,
    pub kind: SourceKind,
    /// Content hash of the downloaded bytes
    pub checksum: Option<String>,
    pub last_download: Option<DateTime<Utc>>,
    /// Free-form provenance (e.g. POST body parameters)
    pub meta: Option<serde_json::Value>,
}

impl Source {
    pub fn new(code: impl Into<String>, url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            url: url.into(),
            path: path.into(),
            kind: SourceKind::Data,
            checksum: None,
            last_download: None,
            meta: None,
        }
    }

    /// An auxiliary, non-data-bearing download
    pub fn complement(
        code: impl Into<String>,
        url: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind: SourceKind::Complement,
            ..Self::new(code, url, path)
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Apply a successful download outcome to this source
    pub fn apply_outcome(&mut self, outcome: &DownloadOutcome) {
        self.checksum = Some(outcome.checksum.clone());
        self.last_download = Some(outcome.downloaded_at);
    }

    /// The row registered in the sink's `source` dimension
    pub fn dimension_row(&self, provider_code: &str) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "url": self.url,
            "provider": provider_code,
            "checksum": self.checksum,
            "last_download": self.last_download.map(|t| t.to_rfc3339()),
            "meta_data": self.meta,
        })
    }
}

/// Result of downloading and checksumming one source
///
/// Returned by the download layer instead of mutating the `Source` in place,
/// so the parallel fan-out never shares mutable state across workers.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// `Source::code` this outcome belongs to
    pub code: String,
    /// Where the payload was written
    pub path: PathBuf,
    /// Hex digest of the exact bytes written to `path`
    pub checksum: String,
    pub bytes_written: u64,
    pub downloaded_at: DateTime<Utc>,
}
