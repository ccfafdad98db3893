//! REST ingestion sink
//!
//! The lowest-tier upsert strategy: payloads are chunked and POSTed to the
//! ingestion API, dimension rows are pre-checked with GET so duplicate keys
//! are never submitted, and source checksums/download timestamps are pushed
//! with PUT after a successful run.

use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::SinkError;
use crate::frame::Frame;
use crate::source::Source;

/// Default chunk size for fact-row uploads
pub const DEFAULT_DATAPOINT_BATCH: usize = 20_000;
/// Default chunk size for dimension-row uploads
pub const DEFAULT_DIMENSION_BATCH: usize = 1_000;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the ingestion API (no trailing slash)
    pub base_url: String,
    pub datapoint_batch_size: usize,
    pub dimension_batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            datapoint_batch_size: DEFAULT_DATAPOINT_BATCH,
            dimension_batch_size: DEFAULT_DIMENSION_BATCH,
            timeout_secs: 120,
        }
    }
}

/// Typed client over the ingestion API
pub struct ApiSink {
    client: Client,
    config: ApiConfig,
}

impl ApiSink {
    pub fn new(config: ApiConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SinkError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }

    /// `GET /dimension/{name}?{filters}` — existing dimension rows
    pub async fn get_dimension(
        &self,
        name: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<serde_json::Value>, SinkError> {
        let response = self
            .client
            .get(self.url(&format!("/dimension/{name}")))
            .query(filters)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json().await?)
    }

    /// Warehouse-recorded checksum per source code; codes the warehouse has
    /// never seen are absent from the result.
    pub async fn recorded_checksums(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, String>, SinkError> {
        let mut recorded = HashMap::new();
        for code in codes {
            let rows = self.get_dimension("source", &[("code", code)]).await?;
            for row in rows {
                if row.get("code").and_then(|v| v.as_str()) == Some(code.as_str()) {
                    if let Some(checksum) = row.get("checksum").and_then(|v| v.as_str()) {
                        recorded.insert(code.clone(), checksum.to_string());
                    }
                }
            }
        }
        Ok(recorded)
    }

    /// `POST /dimension/{name}` — upload dimension rows in chunks
    pub async fn insert_dimension_rows(
        &self,
        name: &str,
        rows: &[serde_json::Value],
    ) -> Result<usize, SinkError> {
        for chunk in rows.chunks(self.config.dimension_batch_size.max(1)) {
            debug!(dimension = name, rows = chunk.len(), "uploading dimension chunk");
            let response = self
                .client
                .post(self.url(&format!("/dimension/{name}")))
                .json(chunk)
                .send()
                .await?;
            Self::expect_success(response).await?;
        }
        if !rows.is_empty() {
            info!(dimension = name, rows = rows.len(), "dimension rows uploaded");
        }
        Ok(rows.len())
    }

    /// `POST /main/datapoint` — upload the payload in chunks
    pub async fn upload_datapoints(&self, frame: &Frame) -> Result<usize, SinkError> {
        let records = frame.to_records();
        for chunk in records.chunks(self.config.datapoint_batch_size.max(1)) {
            debug!(rows = chunk.len(), "uploading datapoint chunk");
            let response = self
                .client
                .post(self.url("/main/datapoint"))
                .json(chunk)
                .send()
                .await?;
            Self::expect_success(response).await?;
        }
        info!(rows = records.len(), "datapoints uploaded");
        Ok(records.len())
    }

    /// `PUT /dimension/source/{code}` — record checksum and download time
    pub async fn update_source(&self, source: &Source) -> Result<(), SinkError> {
        let body = serde_json::json!({
            "checksum": source.checksum,
            "last_download": source.last_download.map(|t| t.to_rfc3339()),
        });
        let response = self
            .client
            .put(self.url(&format!("/dimension/source/{}", source.code)))
            .json(&body)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}
