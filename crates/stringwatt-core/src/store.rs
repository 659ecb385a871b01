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

//! Storage layer: device catalog, raw per-string telemetry and the
//! rollup table, all in one SQLite database.
//!
//! Raw telemetry is normalized: one row per (inverter, timestamp,
//! string index) carrying voltage and current. Reading a device's
//! samples is therefore a plain filtered query bounded to
//! `1..=string_count`; no per-string column lists are ever generated.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use tracing::info;

use stringwatt_shared::{Device, HourlyRollup, RunReport, StringSample};

use crate::error::{PipelineError, Result};

/// Half-open-free time window for a sample read: `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SampleWindow {
    /// Trailing window of `days` ending at `end`. Strictly rolling
    /// from the given instant, not anchored to calendar boundaries.
    #[must_use]
    pub fn trailing_days(days: i64, end: DateTime<Utc>) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }
}

/// Data access used by the pipeline.
///
/// Synchronous by design; the scheduler runs a whole pipeline
/// invocation on a blocking task. The trait seam exists so tests can
/// substitute failing or instrumented stores.
pub trait TelemetryStore: Send + Sync {
    /// Load the device catalog, fresh each run.
    fn devices(&self) -> Result<Vec<Device>>;

    /// Per-string samples for one device inside the window, bounded
    /// to string indices `1..=string_count`. A device with
    /// `string_count == 0` yields an empty set without querying.
    fn string_samples(&self, device: &Device, window: &SampleWindow) -> Result<Vec<StringSample>>;

    /// Upsert all rollup rows of one run in a single transaction.
    /// Conflicts on the natural key replace the stored average, so
    /// re-running a calculation date is idempotent.
    fn replace_rollups(&self, rows: &[HourlyRollup]) -> Result<usize>;

    /// Read contract for the downstream dashboard: most recent rows
    /// for a plant, ordered by (date desc, hour desc), bounded.
    fn latest_rollups(&self, plant_id: i64, limit: u32) -> Result<Vec<HourlyRollup>>;

    /// Persist the structured outcome of a run.
    fn record_run(&self, report: &RunReport) -> Result<()>;

    /// Drop rollup rows older than the retention horizon. Returns the
    /// number of deleted rows.
    fn cleanup_old_rollups(&self, retention_days: u32) -> Result<u64>;
}

/// SQLite-backed store shared across runs. The connection is opened
/// once and handed to each component explicitly; there is no ambient
/// global handle.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::CatalogUnavailable(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = rusqlite::Connection::open(path).map_err(|e| {
            PipelineError::CatalogUnavailable(format!("failed to open database {path}: {e}"))
        })?;

        Self::init_schema(&conn)?;
        info!("Opened rollup database at {path}");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests and local experiments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| {
            PipelineError::CatalogUnavailable(format!("failed to open in-memory database: {e}"))
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS inverters (
                id             INTEGER PRIMARY KEY,
                plant_id       INTEGER NOT NULL,
                string_count   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS string_readings (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                inverter_id    INTEGER NOT NULL,
                string_number  INTEGER NOT NULL,
                timestamp      TEXT NOT NULL,
                voltage        REAL NOT NULL,
                current        REAL NOT NULL,
                FOREIGN KEY (inverter_id) REFERENCES inverters(id)
            );

            CREATE INDEX IF NOT EXISTS idx_string_readings_inverter_time
                ON string_readings(inverter_id, timestamp);

            CREATE TABLE IF NOT EXISTS string_hourly_rollups (
                plant_id          INTEGER NOT NULL,
                inverter_id       INTEGER NOT NULL,
                string_number     INTEGER NOT NULL,
                hourly_avg_power  REAL NOT NULL,
                calculation_hour  INTEGER NOT NULL,
                calculation_date  TEXT NOT NULL,
                PRIMARY KEY (plant_id, inverter_id, string_number,
                             calculation_hour, calculation_date)
            );

            CREATE INDEX IF NOT EXISTS idx_rollups_plant_date
                ON string_hourly_rollups(plant_id, calculation_date DESC);

            CREATE TABLE IF NOT EXISTS calculation_runs (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                calculation_date   TEXT NOT NULL,
                started_at         TEXT NOT NULL,
                finished_at        TEXT NOT NULL,
                status             TEXT NOT NULL,
                devices_total      INTEGER NOT NULL,
                devices_processed  INTEGER NOT NULL,
                devices_skipped    INTEGER NOT NULL,
                devices_failed     INTEGER NOT NULL,
                rows_written       INTEGER NOT NULL,
                error              TEXT
            );",
        )
        .map_err(|e| {
            PipelineError::CatalogUnavailable(format!("failed to initialize schema: {e}"))
        })?;

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Register an inverter in the device catalog (provisioning side;
    /// the pipeline itself only reads the catalog).
    pub fn insert_device(&self, device: &Device) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO inverters (id, plant_id, string_count) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                plant_id = excluded.plant_id,
                string_count = excluded.string_count",
            params![device.id, device.plant_id, device.string_count],
        )
        .map_err(|e| PipelineError::WriteFailure(format!("failed to insert device: {e}")))?;
        Ok(())
    }

    /// Append one raw per-string reading (ingest side).
    pub fn insert_reading(
        &self,
        inverter_id: i64,
        string_number: u32,
        timestamp: DateTime<Utc>,
        voltage: f64,
        current: f64,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO string_readings (inverter_id, string_number, timestamp, voltage, current)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                inverter_id,
                string_number,
                timestamp.to_rfc3339(),
                voltage,
                current
            ],
        )
        .map_err(|e| PipelineError::WriteFailure(format!("failed to insert reading: {e}")))?;
        Ok(())
    }
}

impl TelemetryStore for SqliteStore {
    fn devices(&self) -> Result<Vec<Device>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, plant_id, string_count FROM inverters ORDER BY id ASC")
            .map_err(|e| PipelineError::CatalogUnavailable(e.to_string()))?;

        let devices = stmt
            .query_map([], |row| {
                Ok(Device {
                    id: row.get(0)?,
                    plant_id: row.get(1)?,
                    string_count: row.get(2)?,
                })
            })
            .map_err(|e| PipelineError::CatalogUnavailable(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::CatalogUnavailable(e.to_string()))?;

        Ok(devices)
    }

    fn string_samples(&self, device: &Device, window: &SampleWindow) -> Result<Vec<StringSample>> {
        // A zero-string device contributes no samples; don't issue a
        // degenerate query for it.
        if device.string_count <= 0 {
            return Ok(Vec::new());
        }

        let read_err = |e: rusqlite::Error| PipelineError::SampleReadFailure {
            inverter_id: device.id,
            reason: e.to_string(),
        };

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT string_number, voltage, current, timestamp
                 FROM string_readings
                 WHERE inverter_id = ?1
                   AND string_number BETWEEN 1 AND ?2
                   AND timestamp >= ?3 AND timestamp <= ?4
                 ORDER BY timestamp ASC, string_number ASC",
            )
            .map_err(read_err)?;

        let samples = stmt
            .query_map(
                params![
                    device.id,
                    device.string_count,
                    window.start.to_rfc3339(),
                    window.end.to_rfc3339()
                ],
                |row| {
                    Ok(StringSample {
                        string_number: row.get(0)?,
                        voltage: row.get(1)?,
                        current: row.get(2)?,
                        timestamp: row.get(3)?,
                    })
                },
            )
            .map_err(read_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_err)?;

        Ok(samples)
    }

    fn replace_rollups(&self, rows: &[HourlyRollup]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| PipelineError::WriteFailure(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO string_hourly_rollups (
                        plant_id, inverter_id, string_number,
                        hourly_avg_power, calculation_hour, calculation_date
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(plant_id, inverter_id, string_number,
                                 calculation_hour, calculation_date)
                     DO UPDATE SET hourly_avg_power = excluded.hourly_avg_power",
                )
                .map_err(|e| PipelineError::WriteFailure(e.to_string()))?;

            for row in rows {
                stmt.execute(params![
                    row.plant_id,
                    row.inverter_id,
                    row.string_number,
                    row.hourly_avg_power,
                    row.calculation_hour,
                    row.calculation_date.to_string(),
                ])
                .map_err(|e| PipelineError::WriteFailure(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| PipelineError::WriteFailure(e.to_string()))?;

        Ok(rows.len())
    }

    fn latest_rollups(&self, plant_id: i64, limit: u32) -> Result<Vec<HourlyRollup>> {
        let read_err = |e: rusqlite::Error| PipelineError::CatalogUnavailable(e.to_string());

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT plant_id, inverter_id, string_number,
                        hourly_avg_power, calculation_hour, calculation_date
                 FROM string_hourly_rollups
                 WHERE plant_id = ?1
                 ORDER BY calculation_date DESC, calculation_hour DESC,
                          inverter_id ASC, string_number ASC
                 LIMIT ?2",
            )
            .map_err(read_err)?;

        let rows = stmt
            .query_map(params![plant_id, limit], |row| {
                Ok(HourlyRollup {
                    plant_id: row.get(0)?,
                    inverter_id: row.get(1)?,
                    string_number: row.get(2)?,
                    hourly_avg_power: row.get(3)?,
                    calculation_hour: row.get(4)?,
                    calculation_date: row.get(5)?,
                })
            })
            .map_err(read_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_err)?;

        Ok(rows)
    }

    fn record_run(&self, report: &RunReport) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO calculation_runs (
                calculation_date, started_at, finished_at, status,
                devices_total, devices_processed, devices_skipped,
                devices_failed, rows_written, error
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report.calculation_date.to_string(),
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
                report.status.as_str(),
                report.devices_total,
                report.devices_processed,
                report.devices_skipped,
                report.devices_failed,
                report.rows_written,
                report.error,
            ],
        )
        .map_err(|e| PipelineError::WriteFailure(format!("failed to record run: {e}")))?;
        Ok(())
    }

    fn cleanup_old_rollups(&self, retention_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::days(i64::from(retention_days))).date_naive();
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM string_hourly_rollups WHERE calculation_date < ?1",
                params![cutoff.to_string()],
            )
            .map_err(|e| PipelineError::WriteFailure(e.to_string()))?;
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use stringwatt_shared::{RunStatus, SENTINEL_VOLTAGE};
    use tempfile::tempdir;

    fn ts(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, hour, min, 0).unwrap()
    }

    fn device(id: i64, string_count: i64) -> Device {
        Device {
            id,
            plant_id: 1,
            string_count,
        }
    }

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_device(&device(1, 2)).unwrap();
        store.insert_reading(1, 1, ts(14, 0), 10.0, 5.0).unwrap();
        store.insert_reading(1, 2, ts(14, 0), 400.0, 8.0).unwrap();
        store
    }

    #[test]
    fn open_creates_schema_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rollups.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        assert!(store.devices().unwrap().is_empty());
    }

    #[test]
    fn devices_are_ordered_by_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_device(&device(7, 4)).unwrap();
        store.insert_device(&device(2, 8)).unwrap();

        let devices = store.devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, 2);
        assert_eq!(devices[1].id, 7);
    }

    #[test]
    fn samples_are_bounded_to_string_count() {
        let store = seeded_store();
        // A rogue reading above the configured count must not appear.
        store.insert_reading(1, 3, ts(14, 0), 50.0, 1.0).unwrap();

        let window = SampleWindow::trailing_days(7, ts(15, 0));
        let samples = store.string_samples(&device(1, 2), &window).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.string_number <= 2));
    }

    #[test]
    fn zero_string_device_yields_no_samples_and_no_error() {
        let store = seeded_store();
        let window = SampleWindow::trailing_days(7, ts(15, 0));
        let samples = store.string_samples(&device(1, 0), &window).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn samples_outside_window_are_excluded() {
        let store = seeded_store();
        let stale = ts(14, 0) - Duration::days(8);
        store.insert_reading(1, 1, stale, 99.0, 9.0).unwrap();

        let window = SampleWindow::trailing_days(7, ts(15, 0));
        let samples = store.string_samples(&device(1, 2), &window).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.timestamp >= window.start));
    }

    #[test]
    fn sentinel_values_round_trip_unchanged() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_device(&device(1, 1)).unwrap();
        store
            .insert_reading(1, 1, ts(9, 0), SENTINEL_VOLTAGE, 0.0)
            .unwrap();

        let window = SampleWindow::trailing_days(7, ts(10, 0));
        let samples = store.string_samples(&device(1, 1), &window).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].is_sentinel());
    }

    fn rollup(string_number: u32, hour: u32, power: f64) -> HourlyRollup {
        HourlyRollup {
            plant_id: 1,
            inverter_id: 1,
            string_number,
            hourly_avg_power: power,
            calculation_hour: hour,
            calculation_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        }
    }

    #[test]
    fn replace_rollups_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rows = vec![rollup(1, 14, 0.05), rollup(2, 14, 3.2)];

        store.replace_rollups(&rows).unwrap();
        store.replace_rollups(&rows).unwrap();

        let stored = store.latest_rollups(1, 168).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn replace_rollups_updates_average_on_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.replace_rollups(&[rollup(1, 14, 0.05)]).unwrap();
        store.replace_rollups(&[rollup(1, 14, 0.07)]).unwrap();

        let stored = store.latest_rollups(1, 168).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].hourly_avg_power, 0.07);
    }

    #[test]
    fn latest_rollups_orders_by_date_then_hour_desc() {
        let store = SqliteStore::open_in_memory().unwrap();
        let old = HourlyRollup {
            calculation_date: NaiveDate::from_ymd_opt(2025, 6, 9).unwrap(),
            ..rollup(1, 23, 1.0)
        };
        store
            .replace_rollups(&[rollup(1, 8, 0.3), old, rollup(1, 14, 0.5)])
            .unwrap();

        let stored = store.latest_rollups(1, 2).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].calculation_hour, 14);
        assert_eq!(stored[1].calculation_hour, 8);
    }

    #[test]
    fn cleanup_drops_only_rows_past_retention() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ancient = HourlyRollup {
            calculation_date: Utc::now().date_naive() - Duration::days(90),
            ..rollup(1, 10, 0.1)
        };
        let recent = HourlyRollup {
            calculation_date: Utc::now().date_naive(),
            ..rollup(1, 11, 0.2)
        };
        store.replace_rollups(&[ancient, recent]).unwrap();

        let deleted = store.cleanup_old_rollups(30).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.latest_rollups(1, 168).unwrap().len(), 1);
    }

    #[test]
    fn run_reports_are_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = RunReport {
            calculation_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            started_at: ts(2, 0),
            finished_at: ts(2, 1),
            status: RunStatus::Completed,
            devices_total: 3,
            devices_processed: 2,
            devices_skipped: 1,
            devices_failed: 0,
            rows_written: 48,
            error: None,
        };
        store.record_run(&report).unwrap();
    }
}
