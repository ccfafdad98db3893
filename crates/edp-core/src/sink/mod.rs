//! Sink adapters
//!
//! Three interchangeable upsert strategies, all keyed by a declared list of
//! key columns: batched REST upload ([`api::ApiSink`]), SQL full reload and
//! SQL staging-table merge ([`sql::SqlSink`]). The REST sink additionally
//! owns the dimension registry (providers, sources, dynamic dimensions).

pub mod api;
pub mod sql;

use thiserror::Error;

pub use api::{ApiConfig, ApiSink};
pub use sql::{build_merge_sql, SqlSink, SqlTableSpec};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("identifier `{0}` contains characters that break quoting")]
    InvalidIdentifier(String),

    #[error("key column `{0}` is missing from the payload")]
    MissingKeyColumn(String),

    #[error("column `{column}` holds a value incompatible with its inferred type")]
    TypeMismatch { column: String },
}
