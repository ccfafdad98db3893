//! EDP Core — the job lifecycle framework
//!
//! A uniform pipeline for the platform's scraping jobs: download sources in
//! parallel, checksum them, skip anything the warehouse already holds,
//! shape the rest into the canonical tabular payload, normalize and validate
//! it, and upsert the result through one of three interchangeable sink
//! strategies. Day-indexed jobs additionally get a backfill state machine
//! with bounded consecutive-failure tolerance.
//!
//! Concrete provider adapters implement [`job::PipelineJob`] or
//! [`job::bulk::DailyJob`] and register themselves in a
//! [`job::registry::JobRegistry`]; everything else is framework.

pub mod config;
pub mod download;
pub mod frame;
pub mod job;
pub mod quality;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use config::AppConfig;
pub use download::{DownloadError, Downloader};
pub use frame::{Cell, Frame};
pub use job::bulk::{BulkRunner, DailyJob};
pub use job::registry::JobRegistry;
pub use job::runner::{JobRunner, RunOptions, RunReport};
pub use job::{JobParams, PipelineJob, ProviderInfo, StoreStrategy};
pub use quality::{check_frame, process_frame, QualityConfig, QualityError};
pub use source::{DownloadOutcome, Source, SourceKind};
