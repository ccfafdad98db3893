//! Source download layer
//!
//! Fetches raw bytes for each [`Source`] over HTTP(S) or FTP, with retry and
//! exponential backoff, and computes the content checksum used later for
//! change detection. Downloads fan out over a bounded worker pool; a failed
//! source never aborts the batch.

use chrono::Utc;
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use suppaftp::{FtpStream, Mode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::source::{DownloadOutcome, Source};
use edp_common::checksum;

/// Default worker-pool size for parallel downloads
pub const DEFAULT_WORKERS: usize = 15;

/// Default number of attempts per source
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("FTP error: {0}")]
    Ftp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("decompression failed: {0}")]
    Decompression(String),
}

/// Download layer configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Directory downloaded artifacts are cached under
    pub cache_dir: PathBuf,
    /// Bounded worker-pool size for the parallel fan-out
    pub workers: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per source before the outcome is declared failed
    pub max_retries: u32,
    pub user_agent: String,
    /// Optional proxy URL applied to all HTTP requests
    pub proxy: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("edp-download-cache"),
            workers: DEFAULT_WORKERS,
            timeout_secs: 300,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: "edp-ingester/1.0".to_string(),
            proxy: None,
        }
    }
}

/// HTTP/FTP fetcher with retry logic and a bounded parallel fan-out
pub struct Downloader {
    client: Client,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone());

        if let Some(proxy_url) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download one source, write the payload to `source.path` and return
    /// the outcome with the checksum of the bytes written.
    ///
    /// A non-2xx HTTP status is an error, never swallowed; callers running
    /// under [`Downloader::fetch_all`] get isolation per source instead.
    pub async fn download_source(
        &self,
        source: &Source,
        http_headers: Option<&[(String, String)]>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            debug!(
                source = %source.code,
                attempt,
                max = self.config.max_retries,
                "downloading {}",
                source.url
            );

            match self.fetch_once(source, http_headers).await {
                Ok(outcome) => {
                    info!(
                        source = %source.code,
                        bytes = outcome.bytes_written,
                        "downloaded {}",
                        source.url
                    );
                    return Ok(outcome);
                },
                Err(e) => {
                    warn!(
                        source = %source.code,
                        attempt,
                        max = self.config.max_retries,
                        "download attempt failed: {e}"
                    );
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        let backoff_secs = 2u64.pow(attempt);
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    }
                },
            }
        }

        // max_retries >= 1, so at least one attempt ran and set last_error
        Err(last_error.unwrap_or_else(|| {
            DownloadError::InvalidUrl(format!("no attempt made for {}", source.url))
        }))
    }

    /// Download every source concurrently under the bounded worker pool.
    ///
    /// Failed items are logged and returned as error outcomes so the caller
    /// can drop them from the run; one bad source never crashes the batch.
    pub async fn fetch_all(
        &self,
        sources: &[Source],
    ) -> Vec<(String, Result<DownloadOutcome, DownloadError>)> {
        let results: Vec<(String, Result<DownloadOutcome, DownloadError>)> =
            stream::iter(sources.iter())
                .map(|source| async move {
                    (source.code.clone(), self.download_source(source, None).await)
                })
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            warn!(
                failed,
                total = sources.len(),
                "some sources failed to download and are excluded from this run"
            );
        }

        results
    }

    async fn fetch_once(
        &self,
        source: &Source,
        http_headers: Option<&[(String, String)]>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let raw = if source.url.starts_with("ftp://") {
            self.fetch_ftp(&source.url).await?
        } else {
            self.fetch_http(&source.url, http_headers).await?
        };

        let bytes = if wants_gzip(source) {
            decompress_gzip(&raw)?
        } else {
            raw
        };

        if let Some(parent) = source.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&source.path, &bytes).await?;

        Ok(DownloadOutcome {
            code: source.code.clone(),
            path: source.path.clone(),
            checksum: checksum::compute_md5(&bytes),
            bytes_written: bytes.len() as u64,
            downloaded_at: Utc::now(),
        })
    }

    async fn fetch_http(
        &self,
        url: &str,
        http_headers: Option<&[(String, String)]>,
    ) -> Result<Vec<u8>, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(headers) = http_headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Download from an FTP server (anonymous login, passive mode)
    async fn fetch_ftp(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let without_scheme = url
            .strip_prefix("ftp://")
            .ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?;

        let (server, path) = without_scheme
            .split_once('/')
            .ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?;

        let server = server.to_string();
        let path = format!("/{path}");

        debug!("connecting to FTP server: {server}");

        tokio::task::spawn_blocking(move || {
            let mut ftp_stream = FtpStream::connect(format!("{server}:21"))
                .map_err(|e| DownloadError::Ftp(e.to_string()))?;

            ftp_stream
                .login("anonymous", "anonymous@")
                .map_err(|e| DownloadError::Ftp(e.to_string()))?;

            // Passive mode for firewall/NAT compatibility
            ftp_stream.set_mode(Mode::Passive);

            let cursor = ftp_stream
                .retr_as_buffer(&path)
                .map_err(|e| DownloadError::Ftp(e.to_string()))?;

            ftp_stream
                .quit()
                .map_err(|e| DownloadError::Ftp(e.to_string()))?;

            Ok(cursor.into_inner())
        })
        .await
        .map_err(|e| DownloadError::Ftp(e.to_string()))?
    }
}

fn wants_gzip(source: &Source) -> bool {
    source
        .meta
        .as_ref()
        .and_then(|m| m.get("decompress"))
        .and_then(|v| v.as_str())
        == Some("gzip")
}

/// Decompress a gzip payload
pub fn decompress_gzip(compressed: &[u8]) -> Result<Vec<u8>, DownloadError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| DownloadError::Decompression(e.to_string()))?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(dir: &std::path::Path) -> DownloadConfig {
        DownloadConfig {
            cache_dir: dir.to_path_buf(),
            workers: 4,
            timeout_secs: 5,
            max_retries: 1,
            ..DownloadConfig::default()
        }
    }

    #[test]
    fn test_decompress_gzip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"Date,Value\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let decompressed = decompress_gzip(&compressed).unwrap();
        assert_eq!(decompressed, b"Date,Value\n");
    }

    #[test]
    fn test_downloader_creation() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Downloader::new(test_config(dir.path())).is_ok());
    }

    #[tokio::test]
    async fn test_download_source_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"Date,Value\n2024-01-01,1\n".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(test_config(dir.path())).unwrap();
        let source = Source::new(
            "feed",
            format!("{}/feed.csv", server.uri()),
            dir.path().join("feed.csv"),
        );

        let outcome = downloader.download_source(&source, None).await.unwrap();

        // Checksum equals the digest of the exact bytes on disk
        let on_disk = std::fs::read(&outcome.path).unwrap();
        assert_eq!(outcome.checksum, checksum::compute_md5(&on_disk));
        assert_eq!(outcome.bytes_written, on_disk.len() as u64);
    }

    #[tokio::test]
    async fn test_download_source_http_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.csv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(test_config(dir.path())).unwrap();
        let source = Source::new(
            "missing",
            format!("{}/missing.csv", server.uri()),
            dir.path().join("missing.csv"),
        );

        let err = downloader.download_source(&source, None).await.unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_download_source_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth.csv"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(test_config(dir.path())).unwrap();
        let source = Source::new(
            "auth",
            format!("{}/auth.csv", server.uri()),
            dir.path().join("auth.csv"),
        );

        let headers = vec![("x-api-key".to_string(), "secret".to_string())];
        let outcome = downloader
            .download_source(&source, Some(&headers))
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 2);
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad.csv"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(test_config(dir.path())).unwrap();
        let sources = vec![
            Source::new("good", format!("{}/good.csv", server.uri()), dir.path().join("good.csv")),
            Source::new("bad", format!("{}/bad.csv", server.uri()), dir.path().join("bad.csv")),
        ];

        let results = downloader.fetch_all(&sources).await;
        assert_eq!(results.len(), 2);

        let good = results.iter().find(|(code, _)| code == "good").unwrap();
        let bad = results.iter().find(|(code, _)| code == "bad").unwrap();
        assert!(good.1.is_ok());
        assert!(bad.1.is_err());
    }

    #[tokio::test]
    async fn test_download_source_gzip_meta() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"Date,Value\n2024-01-01,1\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.csv.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(test_config(dir.path())).unwrap();
        let source = Source::new(
            "gz",
            format!("{}/feed.csv.gz", server.uri()),
            dir.path().join("feed.csv"),
        )
        .with_meta(serde_json::json!({"decompress": "gzip"}));

        let outcome = downloader.download_source(&source, None).await.unwrap();
        let on_disk = std::fs::read(&outcome.path).unwrap();
        assert_eq!(on_disk, b"Date,Value\n2024-01-01,1\n");
        assert_eq!(outcome.checksum, checksum::compute_md5(&on_disk));
    }
}
