//! Day-indexed backfill state machine
//!
//! Bulk jobs extract one calendar day per [`DailyJob::run_date`] call. The
//! [`BulkRunner`] owns the walk: strictly sequential descending dates, a
//! wall-clock timeout per day, and the central retry policy of the whole
//! platform — bounded *consecutive* failure tolerance, with forward progress
//! preserved on partial failure.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// The standard backfill schedule: the most recent week, then days 30–36,
/// then days 90–96. A sparse tri-window sampling that catches late-arriving
/// revisions at three horizons without walking every day.
pub fn default_day_lags() -> Vec<i64> {
    (0..=6).chain(30..=36).chain(90..=96).collect()
}

/// Mutable backfill state owned by the job
#[derive(Debug, Clone, Default)]
pub struct BulkState {
    /// Earliest day known to have been loaded successfully
    pub earliest_available_date: Option<NaiveDate>,
}

impl BulkState {
    /// Move the earliest-available marker to `date` if it is earlier than
    /// the current one. The marker never regresses.
    pub fn advance(&mut self, date: NaiveDate) {
        match self.earliest_available_date {
            Some(current) if current <= date => {},
            _ => self.earliest_available_date = Some(date),
        }
    }
}

/// Contract a day-indexed adapter satisfies
#[async_trait]
pub trait DailyJob: Send + Sync {
    fn job_code(&self) -> &str;

    /// Days of lag between "today" and the most recent complete data point
    fn offset_now(&self) -> i64;

    /// Backfill schedule as lags relative to the latest available day
    fn day_lags(&self) -> Vec<i64> {
        default_day_lags()
    }

    fn state(&mut self) -> &mut BulkState;

    /// Extract and load one calendar day
    async fn run_date(&mut self, date: NaiveDate) -> Result<()>;
}

/// Backfill policy knobs
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Wall-clock budget per `run_date` call; a timeout counts as an
    /// ordinary per-day failure
    pub day_timeout_secs: u64,
    /// `pre_run(historical)` fails the job once this many days have failed
    pub max_errors: usize,
    /// `bulk_run` stops walking after `error_tolerance + 1` consecutive
    /// failed days
    pub error_tolerance: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            day_timeout_secs: 1800,
            max_errors: 21,
            error_tolerance: 7,
        }
    }
}

/// Outcome of a `pre_run` sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreRunReport {
    pub days_attempted: usize,
    pub days_failed: usize,
}

/// Outcome of a `bulk_run` walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub days_succeeded: usize,
    pub days_failed: usize,
    /// The consecutive-failure budget was exhausted before `start` was
    /// reached
    pub stopped_early: bool,
    pub earliest_reached: Option<NaiveDate>,
}

/// Drives [`DailyJob`] implementations across calendar days
pub struct BulkRunner {
    config: BulkConfig,
}

impl BulkRunner {
    pub fn new(config: BulkConfig) -> Self {
        Self { config }
    }

    /// Run one day under the enforced wall-clock timeout
    async fn run_date_guarded<J: DailyJob + ?Sized>(
        &self,
        job: &mut J,
        date: NaiveDate,
    ) -> Result<()> {
        let budget = Duration::from_secs(self.config.day_timeout_secs);
        match tokio::time::timeout(budget, job.run_date(date)).await {
            Ok(result) => result,
            Err(_) => bail!(
                "day {date} timed out after {}s",
                self.config.day_timeout_secs
            ),
        }
    }

    /// Scheduled sweep over the job's day lags.
    ///
    /// Historical mode walks the full `day_lags` schedule; otherwise only
    /// the two most recent offset days are run. Single-day failures are
    /// logged, not raised; the job fails once `max_errors` days have failed.
    pub async fn pre_run<J: DailyJob + ?Sized>(
        &self,
        job: &mut J,
        historical: bool,
    ) -> Result<PreRunReport> {
        let latest = Utc::now().date_naive() - ChronoDuration::days(job.offset_now());
        let lags = if historical {
            job.day_lags()
        } else {
            vec![0, 1]
        };

        let mut report = PreRunReport::default();
        for lag in lags {
            let date = latest - ChronoDuration::days(lag);
            report.days_attempted += 1;

            match self.run_date_guarded(job, date).await {
                Ok(()) => {
                    job.state().advance(date);
                },
                Err(e) => {
                    warn!(job = %job.job_code(), %date, "day extraction failed: {e:#}");
                    report.days_failed += 1;
                    if report.days_failed >= self.config.max_errors {
                        bail!(
                            "{} day extractions failed, aborting job {}",
                            report.days_failed,
                            job.job_code()
                        );
                    }
                },
            }
        }

        info!(
            job = %job.job_code(),
            attempted = report.days_attempted,
            failed = report.days_failed,
            "pre-run sweep complete"
        );
        Ok(report)
    }

    /// Backfill by walking backward one calendar day at a time from `end`
    /// (default: the latest available day) to `start` (default: the epoch).
    ///
    /// Days run strictly sequentially in descending order. A run of
    /// `error_tolerance + 1` consecutive failures stops the walk without
    /// raising past it; progress made up to that point is preserved and
    /// `earliest_available_date` reflects the earliest successful day.
    pub async fn bulk_run<J: DailyJob + ?Sized>(
        &self,
        job: &mut J,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<BulkReport> {
        let latest = Utc::now().date_naive() - ChronoDuration::days(job.offset_now());
        let end = end.unwrap_or(latest);
        let start = start.unwrap_or(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default());

        let mut report = BulkReport::default();
        let mut consecutive_failures = 0usize;
        let mut date = end;

        while date >= start {
            match self.run_date_guarded(job, date).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    report.days_succeeded += 1;
                    job.state().advance(date);
                },
                Err(e) => {
                    warn!(job = %job.job_code(), %date, "day extraction failed: {e:#}");
                    report.days_failed += 1;
                    consecutive_failures += 1;
                    if consecutive_failures > self.config.error_tolerance {
                        warn!(
                            job = %job.job_code(),
                            consecutive = consecutive_failures,
                            tolerance = self.config.error_tolerance,
                            "consecutive-failure budget exhausted, stopping backfill"
                        );
                        report.stopped_early = true;
                        break;
                    }
                },
            }
            date = date - ChronoDuration::days(1);
        }

        report.earliest_reached = job.state().earliest_available_date;
        info!(
            job = %job.job_code(),
            succeeded = report.days_succeeded,
            failed = report.days_failed,
            stopped_early = report.stopped_early,
            "backfill complete"
        );
        Ok(report)
    }
}
