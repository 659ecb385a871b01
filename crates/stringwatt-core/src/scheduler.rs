// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of StringWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Daily scheduling of the rollup pipeline.
//!
//! The loop is `Idle -> Waiting (until the configured wall-clock
//! time) -> Running -> Idle`. A manual `run-now` invocation shares
//! the same entry point. A run-lock guarantees at most one run at a
//! time: a trigger arriving while a run is in flight is rejected with
//! [`PipelineError::RunInProgress`] instead of executing concurrently.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use stringwatt_shared::RunReport;

use crate::error::{PipelineError, Result};
use crate::pipeline::{PipelineConfig, run_pipeline};
use crate::store::TelemetryStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock time (UTC) of the daily run.
    pub run_at: NaiveTime,
    /// Upper bound on one pipeline run; an overrunning run is
    /// cancelled so an unreachable database cannot wedge the loop.
    pub run_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_at: NaiveTime::from_hms_opt(2, 0, 0).expect("valid time"),
            run_timeout_secs: 1800,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn TelemetryStore>,
    pipeline_config: PipelineConfig,
    config: SchedulerConfig,
    /// Single-flight guard shared by the timer and manual triggers.
    run_lock: Mutex<()>,
    /// Cooperative cancellation, observed by the pipeline between
    /// devices and before its write transaction.
    cancel: Arc<AtomicBool>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pipeline_config", &self.pipeline_config)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        pipeline_config: PipelineConfig,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            pipeline_config,
            config,
            run_lock: Mutex::new(()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Next occurrence of `run_at` strictly after `now`.
    #[must_use]
    pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
        let today = now.date_naive().and_time(run_at).and_utc();
        if today > now {
            today
        } else {
            (now.date_naive() + Days::new(1)).and_time(run_at).and_utc()
        }
    }

    /// Run the pipeline once, immediately.
    ///
    /// Rejects with [`PipelineError::RunInProgress`] when another run
    /// holds the run-lock. The lock is held for the full invocation
    /// and released on every exit path, including failure.
    pub async fn trigger_now(&self) -> Result<RunReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Pipeline trigger rejected: a run is already in progress");
            return Err(PipelineError::RunInProgress);
        };

        self.cancel.store(false, Ordering::Relaxed);

        let store = Arc::clone(&self.store);
        let pipeline_config = self.pipeline_config.clone();
        let cancel = Arc::clone(&self.cancel);
        let mut task = tokio::task::spawn_blocking(move || {
            run_pipeline(store.as_ref(), &pipeline_config, &cancel)
        });

        let timeout = Duration::from_secs(self.config.run_timeout_secs);
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => {
                joined.unwrap_or_else(|e| {
                    Err(PipelineError::WriteFailure(format!("pipeline task failed: {e}")))
                })
            }
            Err(_elapsed) => {
                error!(
                    "Pipeline run exceeded {}s timeout, requesting cancellation",
                    self.config.run_timeout_secs
                );
                self.cancel.store(true, Ordering::Relaxed);
                // Wait for the run to acknowledge cancellation so the
                // run-lock outlives the blocking task.
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(PipelineError::WriteFailure(format!(
                        "pipeline task failed: {e}"
                    ))),
                }
            }
        }
    }

    /// Daemon loop: wait for the daily time, run, repeat. Exits on
    /// the shutdown signal; a run in flight at shutdown is cancelled
    /// cooperatively and never commits partial rows.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler started, daily run at {} UTC", self.config.run_at);

        loop {
            let now = Utc::now();
            let next = Self::next_run_after(now, self.config.run_at);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                "Waiting until {} for the next rollup run ({}s)",
                next.format("%Y-%m-%d %H:%M:%S"),
                wait.as_secs()
            );

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    tokio::select! {
                        result = self.trigger_now() => match result {
                            Ok(report) => info!(
                                "Scheduled run finished: {} rows for {}",
                                report.rows_written, report.calculation_date
                            ),
                            Err(e) => error!("Scheduled run failed: {e}"),
                        },
                        _ = shutdown.changed() => {
                            info!("Shutdown requested during run, cancelling");
                            self.cancel.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stringwatt_shared::{Device, HourlyRollup, StringSample};

    use crate::store::SampleWindow;

    #[test]
    fn next_run_is_today_when_time_not_yet_reached() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 1, 30, 0).unwrap();
        let run_at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let next = Scheduler::next_run_after(now, run_at);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap());
    }

    #[test]
    fn next_run_rolls_to_tomorrow_once_time_has_passed() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap();
        let run_at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let next = Scheduler::next_run_after(now, run_at);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 11, 2, 0, 0).unwrap());
    }

    /// Store with an artificially slow catalog read, to hold the
    /// run-lock long enough for a competing trigger.
    struct SlowStore {
        catalog_delay: Duration,
    }

    impl TelemetryStore for SlowStore {
        fn devices(&self) -> crate::Result<Vec<Device>> {
            std::thread::sleep(self.catalog_delay);
            Ok(Vec::new())
        }
        fn string_samples(
            &self,
            _: &Device,
            _: &SampleWindow,
        ) -> crate::Result<Vec<StringSample>> {
            Ok(Vec::new())
        }
        fn replace_rollups(&self, rows: &[HourlyRollup]) -> crate::Result<usize> {
            Ok(rows.len())
        }
        fn latest_rollups(&self, _: i64, _: u32) -> crate::Result<Vec<HourlyRollup>> {
            Ok(Vec::new())
        }
        fn record_run(&self, _: &RunReport) -> crate::Result<()> {
            Ok(())
        }
        fn cleanup_old_rollups(&self, _: u32) -> crate::Result<u64> {
            Ok(0)
        }
    }

    fn slow_scheduler(catalog_delay: Duration, run_timeout_secs: u64) -> Scheduler {
        Scheduler::new(
            Arc::new(SlowStore { catalog_delay }),
            PipelineConfig::default(),
            SchedulerConfig {
                run_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
                run_timeout_secs,
            },
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_trigger_is_rejected_not_run() {
        let scheduler = Arc::new(slow_scheduler(Duration::from_millis(300), 60));

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.trigger_now().await })
        };
        // Give the first trigger time to take the run-lock.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = scheduler.trigger_now().await;
        assert!(matches!(second, Err(PipelineError::RunInProgress)));

        let first = first.await.unwrap();
        assert!(first.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lock_is_released_after_a_run() {
        let scheduler = slow_scheduler(Duration::from_millis(10), 60);
        scheduler.trigger_now().await.unwrap();
        scheduler.trigger_now().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overrunning_run_is_cancelled() {
        let scheduler = slow_scheduler(Duration::from_millis(300), 0);
        let result = scheduler.trigger_now().await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
