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

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sensor fault code reported in place of a real voltage reading.
///
/// Fixed vendor convention (max value of the 16-bit register / 10);
/// compared with exact equality, not a tolerance band.
pub const SENTINEL_VOLTAGE: f64 = 6553.5;

/// Sensor fault code reported in place of a real current reading
/// (max value of the 16-bit register / 100).
pub const SENTINEL_CURRENT: f64 = 655.35;

/// One inverter as provisioned in the device catalog.
///
/// Owned by the external provisioning process; the pipeline loads the
/// catalog fresh each run and never writes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub plant_id: i64,
    /// Number of DC string inputs this inverter is wired for.
    /// Stored raw; validated by the pipeline before use.
    pub string_count: i64,
}

/// One per-string telemetry reading within the aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringSample {
    /// 1-based DC string index.
    pub string_number: u32,
    pub voltage: f64,
    pub current: f64,
    pub timestamp: DateTime<Utc>,
}

impl StringSample {
    /// True when either channel carries its sensor fault code.
    /// Sentinel samples are excluded from power computation and from
    /// averaging; they are never treated as zero.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.voltage == SENTINEL_VOLTAGE || self.current == SENTINEL_CURRENT
    }

    /// Instantaneous power of a valid sample.
    ///
    /// Preserves the source telemetry's literal formula (V x A / 1000);
    /// whether the result is kW or a scale normalization artifact is
    /// an open product question, so the unit is not asserted here.
    #[must_use]
    pub fn power(&self) -> f64 {
        (self.voltage * self.current) / 1000.0
    }
}

/// One persisted hourly average row, keyed by
/// (plant, inverter, string, hour-of-day, calculation date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRollup {
    pub plant_id: i64,
    pub inverter_id: i64,
    pub string_number: u32,
    pub hourly_avg_power: f64,
    /// Time-of-day bucket (0-23). Samples from different calendar
    /// days at the same clock hour share a bucket.
    pub calculation_hour: u32,
    /// Date the pipeline run executed, not the date of the underlying
    /// data (the window is trailing N days ending at run time).
    pub calculation_date: NaiveDate,
}

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Structured outcome of one pipeline run, logged and persisted so
/// run results are queryable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub calculation_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub devices_total: usize,
    pub devices_processed: usize,
    /// Devices skipped for invalid string configuration.
    pub devices_skipped: usize,
    /// Devices whose sample read failed (isolated, run continued).
    pub devices_failed: usize,
    pub rows_written: usize,
    /// Human-readable cause when the run did not complete.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(voltage: f64, current: f64) -> StringSample {
        StringSample {
            string_number: 1,
            voltage,
            current,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 14, 5, 0).unwrap(),
        }
    }

    #[test]
    fn sentinel_voltage_is_detected_regardless_of_current() {
        assert!(sample(SENTINEL_VOLTAGE, 0.0).is_sentinel());
        assert!(sample(SENTINEL_VOLTAGE, 12.3).is_sentinel());
    }

    #[test]
    fn sentinel_current_is_detected_regardless_of_voltage() {
        assert!(sample(0.0, SENTINEL_CURRENT).is_sentinel());
        assert!(sample(480.0, SENTINEL_CURRENT).is_sentinel());
    }

    #[test]
    fn near_sentinel_values_are_real_measurements() {
        assert!(!sample(6553.4, 5.0).is_sentinel());
        assert!(!sample(480.0, 655.34).is_sentinel());
    }

    #[test]
    fn power_is_voltage_times_current_over_thousand() {
        assert_eq!(sample(10.0, 5.0).power(), 0.05);
        assert_eq!(sample(400.0, 8.0).power(), 3.2);
    }

    #[test]
    fn negative_readings_flow_through_power() {
        // No physical-plausibility validation by design.
        assert_eq!(sample(-10.0, 5.0).power(), -0.05);
    }
}
