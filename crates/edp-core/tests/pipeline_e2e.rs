//! End-to-end pipeline test against a mock ingestion API
//!
//! A synthetic provider job runs through the whole lifecycle: download,
//! checksum, staleness filter, transform, normalize, gate, dimension
//! registration, datapoint upload and source metadata update.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edp_core::download::{DownloadConfig, Downloader};
use edp_core::frame::{Cell, Frame};
use edp_core::job::runner::{JobRunner, RunOptions};
use edp_core::job::{PipelineJob, ProviderInfo};
use edp_core::quality::config::FlowRule;
use edp_core::quality::QualityConfig;
use edp_core::sink::{ApiConfig, ApiSink};
use edp_core::source::Source;

const FEED_BODY: &str = "Date,Country,Value\n2024-01-01,France,10\n2024-01-01,France,32\n";

struct GridLoadJob {
    base_url: String,
    cache_dir: PathBuf,
}

#[async_trait]
impl PipelineJob for GridLoadJob {
    fn provider(&self) -> ProviderInfo {
        ProviderInfo {
            code: "acme_tso".to_string(),
            long_name: "Acme Transmission System Operator".to_string(),
            url: "https://acme-tso.example".to_string(),
        }
    }

    fn job_code(&self) -> &str {
        "grid_load"
    }

    async fn sources(&self) -> anyhow::Result<Vec<Source>> {
        Ok(vec![Source::new(
            "acme_tso_load",
            format!("{}/feed.csv", self.base_url),
            self.cache_dir.join("feed.csv"),
        )])
    }

    async fn transform(&self, fetched: &[Source]) -> anyhow::Result<Frame> {
        let mut frame = Frame::new(vec!["Metric", "Product", "Country", "Date", "Value"]);
        for source in fetched {
            let body = tokio::fs::read_to_string(&source.path).await?;
            for line in body.lines().skip(1) {
                let fields: Vec<&str> = line.split(',').collect();
                frame.push_row(vec![
                    Cell::text("Demand"),
                    Cell::text("Electricity"),
                    Cell::text(fields[1]),
                    Cell::text(fields[0]),
                    Cell::Number(fields[2].parse()?),
                ])?;
            }
        }
        Ok(frame)
    }

    fn dynamic_dimensions(&self, _frame: &Frame) -> BTreeMap<String, Vec<serde_json::Value>> {
        BTreeMap::from([(
            "product".to_string(),
            vec![serde_json::json!({"code": "Electricity"})],
        )])
    }
}

fn quality_config() -> QualityConfig {
    QualityConfig {
        tolerated_columns: BTreeSet::from([
            "Metric".to_string(),
            "Product".to_string(),
            "Country".to_string(),
            "Date".to_string(),
            "Value".to_string(),
            "Export Date".to_string(),
        ]),
        mandatory_columns: BTreeSet::from([
            "Metric".to_string(),
            "Product".to_string(),
            "Value".to_string(),
        ]),
        tolerated_metrics: BTreeSet::from(["Demand".to_string()]),
        tolerated_flows: BTreeMap::from([(
            "Flow 1".to_string(),
            BTreeMap::from([("Demand".to_string(), FlowRule::All)]),
        )]),
        tolerated_countries: BTreeSet::from(["FRA".to_string()]),
        countries: BTreeMap::from([("France".to_string(), "FRA".to_string())]),
        ..QualityConfig::default()
    }
}

fn runner_for(server: &MockServer, cache_dir: &std::path::Path) -> JobRunner {
    let downloader = Downloader::new(DownloadConfig {
        cache_dir: cache_dir.to_path_buf(),
        workers: 4,
        timeout_secs: 5,
        max_retries: 1,
        ..DownloadConfig::default()
    })
    .unwrap();
    let api = ApiSink::new(ApiConfig {
        base_url: server.uri(),
        timeout_secs: 5,
        ..ApiConfig::default()
    })
    .unwrap();
    JobRunner::with_parts(downloader, api, None, quality_config())
}

async fn mount_dimension_reads(server: &MockServer, recorded: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/dimension/source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recorded))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dimension/provider"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dimension/product"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fresh_source_flows_to_the_sink() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/feed.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .mount(&server)
        .await;
    mount_dimension_reads(&server, serde_json::json!([])).await;

    Mock::given(method("POST"))
        .and(path("/dimension/provider"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dimension/source"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dimension/product"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/main/datapoint"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/dimension/source/acme_tso_load"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let job = GridLoadJob {
        base_url: server.uri(),
        cache_dir: cache.path().to_path_buf(),
    };
    let runner = runner_for(&server, cache.path());

    let report = runner.run(&job, &RunOptions::default()).await.unwrap();

    assert_eq!(report.sources_total, 1);
    assert_eq!(report.sources_failed, 0);
    assert_eq!(report.sources_skipped, 0);
    // Two raw rows share every dimension; their values are summed into one
    assert_eq!(report.rows_loaded, 1);
    assert_eq!(report.dimension_rows_added, 1);
}

#[tokio::test]
async fn unchanged_source_is_skipped() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/feed.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .mount(&server)
        .await;

    // The warehouse already recorded the checksum of exactly this payload
    let checksum = edp_common::checksum::compute_md5(FEED_BODY.as_bytes());
    Mock::given(method("GET"))
        .and(path("/dimension/source"))
        .and(query_param("code", "acme_tso_load"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"code": "acme_tso_load", "checksum": checksum}
        ])))
        .mount(&server)
        .await;

    // Nothing fresh: no upload must happen
    Mock::given(method("POST"))
        .and(path("/main/datapoint"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let job = GridLoadJob {
        base_url: server.uri(),
        cache_dir: cache.path().to_path_buf(),
    };
    let runner = runner_for(&server, cache.path());

    let report = runner.run(&job, &RunOptions::default()).await.unwrap();

    assert_eq!(report.sources_skipped, 1);
    assert_eq!(report.rows_loaded, 0);
}
