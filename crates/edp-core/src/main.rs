//! `edp` — run one registered job from the command line
//!
//! Provider adapter crates register their jobs in the registry built in
//! [`build_registry`]; the CLI resolves a `(provider, source)` pair and
//! drives the matching runner. Scheduling is external (cron or similar);
//! failures surface through the exit code and the logs.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use edp_core::job::bulk::BulkRunner;
use edp_core::job::registry::{AnyJob, JobRegistry};
use edp_core::job::JobParams;
use edp_core::job::runner::{JobRunner, RunOptions};
use edp_core::quality::QualityConfig;
use edp_core::AppConfig;
use edp_common::logging::{init_logging, LogConfig};

#[derive(Parser)]
#[command(name = "edp")]
#[command(about = "Energy data platform job runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one registered job
    Run {
        /// Provider code the job is registered under
        provider: String,
        /// Source code the job is registered under
        source: String,
        /// Reprocess the entire available history
        #[arg(long)]
        full_load: bool,
        /// Skip the network fetch and work from the local cache
        #[arg(long)]
        no_download: bool,
        /// For day-indexed jobs: sweep the full day-lag schedule
        #[arg(long)]
        historical: bool,
        /// For day-indexed jobs: backfill from this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// For day-indexed jobs: backfill down from this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// List registered jobs
    List,
}

/// The registry every deployment shares. Provider adapter crates add their
/// `register_pipeline`/`register_daily` calls here.
fn build_registry() -> JobRegistry {
    JobRegistry::new()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging(&LogConfig::from_env()?)?;

    let cli = Cli::parse();
    let registry = build_registry();

    match cli.command {
        Command::List => {
            if registry.is_empty() {
                println!("no jobs registered");
            }
            for (provider, source) in registry.keys() {
                println!("{provider} {source}");
            }
        },
        Command::Run {
            provider,
            source,
            full_load,
            no_download,
            historical,
            from,
            to,
        } => {
            let config = AppConfig::from_env()?;
            let params = JobParams {
                full_load,
                ..JobParams::default()
            };

            match registry.create(&provider, &source, &params)? {
                AnyJob::Pipeline(job) => {
                    let quality_path = config
                        .quality_config_path
                        .as_deref()
                        .context("EDP_QUALITY_CONFIG must point at the dataset vocabulary")?;
                    let quality = QualityConfig::from_path(quality_path)?;

                    let runner = JobRunner::new(&config, quality)?;
                    let report = runner
                        .run(
                            job.as_ref(),
                            &RunOptions {
                                download: !no_download,
                            },
                        )
                        .await?;
                    info!(?report, "run finished");
                },
                AnyJob::Daily(mut job) => {
                    let runner = BulkRunner::new(config.bulk.clone());
                    if from.is_some() || to.is_some() {
                        let report = runner.bulk_run(job.as_mut(), from, to).await?;
                        info!(?report, "backfill finished");
                    } else {
                        let report = runner.pre_run(job.as_mut(), historical).await?;
                        info!(?report, "sweep finished");
                    }
                },
            }
        },
    }

    Ok(())
}
