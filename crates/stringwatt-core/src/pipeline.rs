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

//! One pipeline run: catalog read, per-device aggregation with fault
//! isolation, transactional rollup upsert, retention cleanup.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use stringwatt_shared::{Device, HourlyRollup, RunReport, RunStatus};

use crate::aggregate;
use crate::error::{PipelineError, Result};
use crate::store::{SampleWindow, TelemetryStore};

/// Tuning for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trailing aggregation window, in days, ending at run time.
    pub window_days: i64,
    /// Ceiling for a device's configured string count. Counts above
    /// this are treated as misconfiguration and the device skipped.
    pub max_string_count: i64,
    /// Rollup rows older than this many calculation dates are dropped
    /// after a successful run.
    pub retention_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            max_string_count: 64,
            retention_days: 30,
        }
    }
}

fn validate_string_count(device: &Device, max: i64) -> Result<()> {
    if device.string_count < 0 {
        return Err(PipelineError::DeviceConfigInvalid {
            inverter_id: device.id,
            reason: format!("negative string count {}", device.string_count),
        });
    }
    if device.string_count > max {
        return Err(PipelineError::DeviceConfigInvalid {
            inverter_id: device.id,
            reason: format!("string count {} exceeds maximum {max}", device.string_count),
        });
    }
    Ok(())
}

/// Execute one full rollup run against the store.
///
/// Catalog and write failures are fatal; invalid device configuration
/// and per-device read failures are isolated, logged and counted. The
/// `cancel` flag is checked between devices and before the write, so
/// an aborted run never commits partial rows (the only write is one
/// transaction at the end).
pub fn run_pipeline(
    store: &dyn TelemetryStore,
    config: &PipelineConfig,
    cancel: &AtomicBool,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let calculation_date = started_at.date_naive();
    let window = SampleWindow::trailing_days(config.window_days, started_at);

    info!(
        "Starting rollup run for {calculation_date} (window {} .. {})",
        window.start.format("%Y-%m-%d %H:%M"),
        window.end.format("%Y-%m-%d %H:%M"),
    );

    let fail = |status: RunStatus, err: &PipelineError, report: RunReport| {
        let report = RunReport {
            finished_at: Utc::now(),
            status,
            error: Some(err.to_string()),
            ..report
        };
        // Best effort; the original failure is what gets propagated.
        if let Err(record_err) = store.record_run(&report) {
            warn!("Failed to record failed run: {record_err}");
        }
    };

    let blank_report = RunReport {
        calculation_date,
        started_at,
        finished_at: started_at,
        status: RunStatus::Failed,
        devices_total: 0,
        devices_processed: 0,
        devices_skipped: 0,
        devices_failed: 0,
        rows_written: 0,
        error: None,
    };

    let devices = match store.devices() {
        Ok(devices) => devices,
        Err(e) => {
            error!("Device catalog read failed, aborting run: {e}");
            fail(RunStatus::Failed, &e, blank_report.clone());
            return Err(e);
        }
    };

    let mut devices_processed = 0;
    let mut devices_skipped = 0;
    let mut devices_failed = 0;
    let mut rollups: Vec<HourlyRollup> = Vec::new();

    for device in &devices {
        if cancel.load(Ordering::Relaxed) {
            warn!("Rollup run cancelled before inverter {}", device.id);
            let err = PipelineError::Cancelled;
            fail(
                RunStatus::Cancelled,
                &err,
                RunReport {
                    devices_total: devices.len(),
                    devices_processed,
                    devices_skipped,
                    devices_failed,
                    ..blank_report.clone()
                },
            );
            return Err(err);
        }

        if let Err(e) = validate_string_count(device, config.max_string_count) {
            warn!("Skipping inverter {}: {e}", device.id);
            devices_skipped += 1;
            continue;
        }

        let samples = match store.string_samples(device, &window) {
            Ok(samples) => samples,
            Err(e) => {
                error!("Sample read failed for inverter {}, continuing: {e}", device.id);
                devices_failed += 1;
                continue;
            }
        };

        let rows = aggregate::hourly_averages(device, &samples, calculation_date);
        debug!(
            "Inverter {}: {} samples -> {} rollup rows",
            device.id,
            samples.len(),
            rows.len()
        );
        rollups.extend(rows);
        devices_processed += 1;
    }

    if cancel.load(Ordering::Relaxed) {
        warn!("Rollup run cancelled before write, no rows committed");
        let err = PipelineError::Cancelled;
        fail(
            RunStatus::Cancelled,
            &err,
            RunReport {
                devices_total: devices.len(),
                devices_processed,
                devices_skipped,
                devices_failed,
                ..blank_report.clone()
            },
        );
        return Err(err);
    }

    let rows_written = match store.replace_rollups(&rollups) {
        Ok(n) => n,
        Err(e) => {
            error!("Rollup write failed, aborting run: {e}");
            fail(
                RunStatus::Failed,
                &e,
                RunReport {
                    devices_total: devices.len(),
                    devices_processed,
                    devices_skipped,
                    devices_failed,
                    ..blank_report.clone()
                },
            );
            return Err(e);
        }
    };

    // Maintenance, not part of the run contract.
    match store.cleanup_old_rollups(config.retention_days) {
        Ok(0) => {}
        Ok(deleted) => info!("Dropped {deleted} rollup rows past retention"),
        Err(e) => warn!("Rollup retention cleanup failed: {e}"),
    }

    let report = RunReport {
        calculation_date,
        started_at,
        finished_at: Utc::now(),
        status: RunStatus::Completed,
        devices_total: devices.len(),
        devices_processed,
        devices_skipped,
        devices_failed,
        rows_written,
        error: None,
    };

    if let Err(e) = store.record_run(&report) {
        warn!("Failed to record completed run: {e}");
    }

    info!(
        "Rollup run for {calculation_date} completed: {} devices ({} skipped, {} failed), {} rows written",
        report.devices_total, report.devices_skipped, report.devices_failed, report.rows_written
    );

    Ok(report)
}
