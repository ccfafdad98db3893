//! Application configuration
//!
//! One explicit [`AppConfig`] built at startup and passed by reference into
//! the runners — configuration is never ambient module state. Every field is
//! environment-driven with a sensible default and validated before use.

use std::path::PathBuf;
use std::time::Duration;

use crate::download::DownloadConfig;
use crate::job::bulk::BulkConfig;
use crate::sink::ApiConfig;

/// Database connectivity for dedicated-table jobs
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Postgres connection string; optional because API-only deployments
    /// never touch SQL
    pub url: Option<String>,
}

/// Top-level configuration for a job run
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub bulk: BulkConfig,
    /// Path of the per-dataset quality vocabulary file
    pub quality_config_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            bulk: BulkConfig::default(),
            quality_config_path: None,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Variables (all optional):
    /// - `EDP_CACHE_DIR`, `EDP_DOWNLOAD_WORKERS`, `EDP_DOWNLOAD_TIMEOUT_SECS`,
    ///   `EDP_DOWNLOAD_MAX_RETRIES`, `EDP_USER_AGENT`, `EDP_HTTP_PROXY`
    /// - `EDP_API_BASE_URL`, `EDP_API_DATAPOINT_BATCH`,
    ///   `EDP_API_DIMENSION_BATCH`, `EDP_API_TIMEOUT_SECS`
    /// - `EDP_DATABASE_URL`
    /// - `EDP_DAY_TIMEOUT_SECS`, `EDP_BULK_MAX_ERRORS`,
    ///   `EDP_BULK_ERROR_TOLERANCE`
    /// - `EDP_QUALITY_CONFIG`
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let download = DownloadConfig {
            cache_dir: std::env::var("EDP_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download.cache_dir),
            workers: env_parsed("EDP_DOWNLOAD_WORKERS", defaults.download.workers),
            timeout_secs: env_parsed("EDP_DOWNLOAD_TIMEOUT_SECS", defaults.download.timeout_secs),
            max_retries: env_parsed("EDP_DOWNLOAD_MAX_RETRIES", defaults.download.max_retries),
            user_agent: std::env::var("EDP_USER_AGENT")
                .unwrap_or(defaults.download.user_agent),
            proxy: std::env::var("EDP_HTTP_PROXY").ok(),
        };

        let api = ApiConfig {
            base_url: std::env::var("EDP_API_BASE_URL").unwrap_or(defaults.api.base_url),
            datapoint_batch_size: env_parsed(
                "EDP_API_DATAPOINT_BATCH",
                defaults.api.datapoint_batch_size,
            ),
            dimension_batch_size: env_parsed(
                "EDP_API_DIMENSION_BATCH",
                defaults.api.dimension_batch_size,
            ),
            timeout_secs: env_parsed("EDP_API_TIMEOUT_SECS", defaults.api.timeout_secs),
        };

        let database = DatabaseConfig {
            url: std::env::var("EDP_DATABASE_URL").ok(),
        };

        let bulk = BulkConfig {
            day_timeout_secs: env_parsed("EDP_DAY_TIMEOUT_SECS", defaults.bulk.day_timeout_secs),
            max_errors: env_parsed("EDP_BULK_MAX_ERRORS", defaults.bulk.max_errors),
            error_tolerance: env_parsed(
                "EDP_BULK_ERROR_TOLERANCE",
                defaults.bulk.error_tolerance,
            ),
        };

        let config = Self {
            download,
            api,
            database,
            bulk,
            quality_config_path: std::env::var("EDP_QUALITY_CONFIG").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.download.workers == 0 {
            anyhow::bail!("EDP_DOWNLOAD_WORKERS must be greater than 0");
        }
        if self.download.max_retries == 0 {
            anyhow::bail!("EDP_DOWNLOAD_MAX_RETRIES must be greater than 0");
        }
        if self.api.base_url.is_empty() {
            anyhow::bail!("EDP_API_BASE_URL cannot be empty");
        }
        if self.api.datapoint_batch_size == 0 || self.api.dimension_batch_size == 0 {
            anyhow::bail!("API batch sizes must be greater than 0");
        }
        if self.bulk.day_timeout_secs == 0 {
            anyhow::bail!("EDP_DAY_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    /// Per-day extraction budget as a Duration
    pub fn day_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk.day_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download.workers, 15);
        assert_eq!(config.api.datapoint_batch_size, 20_000);
        assert_eq!(config.api.dimension_batch_size, 1_000);
        assert_eq!(config.bulk.max_errors, 21);
        assert_eq!(config.bulk.error_tolerance, 7);
    }

    #[test]
    fn test_validation_zero_workers() {
        let mut config = AppConfig::default();
        config.download.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_base_url() {
        let mut config = AppConfig::default();
        config.api.base_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_batch() {
        let mut config = AppConfig::default();
        config.api.dimension_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_day_timeout_duration() {
        let mut config = AppConfig::default();
        config.bulk.day_timeout_secs = 900;
        assert_eq!(config.day_timeout(), Duration::from_secs(900));
    }
}
