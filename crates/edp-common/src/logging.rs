//! Logging configuration and initialization
//!
//! Centralized tracing setup for the CLI and for jobs run under external
//! schedulers. Jobs run unattended; failures are communicated through log
//! files, so file output with daily rotation is a first-class target.
//!
//! Environment variables:
//! - `LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//! - `LOG_OUTPUT`: console, file, both (default: console)
//! - `LOG_FORMAT`: text, json (default: text)
//! - `LOG_DIR`: directory for log files (default: ./logs)
//! - `LOG_FILE_PREFIX`: log file name prefix (default: edp)
//! - `LOG_FILTER`: extra filter directives (e.g. "sqlx=warn,reqwest=info")

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Output target for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Output target (console, file, or both)
    pub output: LogOutput,

    /// Log format (text or JSON)
    pub format: LogFormat,

    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// Log file name prefix (e.g. "edp" -> "edp.2024-01-18.log")
    pub log_file_prefix: String,

    /// Additional filter directives (e.g. "sqlx=warn,reqwest=info")
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "edp".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }

        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            config.output = output.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }
}

/// Initialize logging with the given configuration
///
/// Sets up the global tracing subscriber; call once at application startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            filter = filter.add_directive(
                directive
                    .parse()
                    .context("Failed to parse filter directive")?,
            );
        }
    }

    let file_writer = match config.output {
        LogOutput::Console => None,
        LogOutput::File | LogOutput::Both => {
            std::fs::create_dir_all(&config.log_dir)
                .context("Failed to create log directory")?;
            let appender =
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // The guard must outlive the subscriber; leak it for the
            // lifetime of the process.
            std::mem::forget(guard);
            Some(non_blocking)
        },
    };

    let registry = tracing_subscriber::registry().with(filter);

    match (config.output, config.format, file_writer) {
        (LogOutput::Console, LogFormat::Text, _) => {
            registry
                .with(fmt::layer().with_span_events(FmtSpan::CLOSE))
                .try_init()?;
        },
        (LogOutput::Console, LogFormat::Json, _) => {
            registry
                .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
                .try_init()?;
        },
        (LogOutput::File, LogFormat::Text, Some(writer)) => {
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init()?;
        },
        (LogOutput::File, LogFormat::Json, Some(writer)) => {
            registry
                .with(fmt::layer().json().with_writer(writer).with_ansi(false))
                .try_init()?;
        },
        (LogOutput::Both, LogFormat::Text, Some(writer)) => {
            registry
                .with(fmt::layer().with_span_events(FmtSpan::CLOSE))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init()?;
        },
        (LogOutput::Both, LogFormat::Json, Some(writer)) => {
            registry
                .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
                .with(fmt::layer().json().with_writer(writer).with_ansi(false))
                .try_init()?;
        },
        // File-targeted outputs always construct a writer above.
        (_, _, None) => unreachable!("file output requested without a writer"),
    }

    Ok(())
}
