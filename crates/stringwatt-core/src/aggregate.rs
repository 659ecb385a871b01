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

//! Sentinel filtering, power derivation and hour-of-day averaging.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use tracing::debug;

use stringwatt_shared::{Device, HourlyRollup, StringSample};

/// Valid sample reduced to its power value and time-of-day bucket.
/// Ephemeral; exists only between filtering and averaging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub string_number: u32,
    /// Clock hour 0-23, date component discarded.
    pub hour_of_day: u32,
    pub power: f64,
}

/// Drop sentinel samples and derive instantaneous power for the rest.
///
/// Sentinel readings never contribute to sums or counts downstream;
/// they are not zeros. No further validation is performed: negative
/// or otherwise surprising power values are presumed physically valid
/// and flow through to the average.
#[must_use]
pub fn power_samples(samples: &[StringSample]) -> Vec<PowerSample> {
    samples
        .iter()
        .filter(|s| !s.is_sentinel())
        .map(|s| PowerSample {
            string_number: s.string_number,
            hour_of_day: s.timestamp.hour(),
            power: s.power(),
        })
        .collect()
}

/// Average one device's valid power samples per (string, hour-of-day)
/// bucket, stamped with the run's calculation date.
///
/// Buckets that end up with zero valid samples are simply absent from
/// the output; an all-sentinel hour is never reported as zero power.
#[must_use]
pub fn hourly_averages(
    device: &Device,
    samples: &[StringSample],
    calculation_date: NaiveDate,
) -> Vec<HourlyRollup> {
    let valid = power_samples(samples);
    let dropped = samples.len() - valid.len();
    if dropped > 0 {
        debug!(
            "Inverter {}: excluded {} sentinel samples of {}",
            device.id,
            dropped,
            samples.len()
        );
    }

    // BTreeMap keeps output ordering deterministic per device.
    let mut buckets: BTreeMap<(u32, u32), (f64, usize)> = BTreeMap::new();
    for sample in &valid {
        let entry = buckets
            .entry((sample.string_number, sample.hour_of_day))
            .or_insert((0.0, 0));
        entry.0 += sample.power;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|((string_number, hour), (sum, count))| HourlyRollup {
            plant_id: device.plant_id,
            inverter_id: device.id,
            string_number,
            hourly_avg_power: sum / count as f64,
            calculation_hour: hour,
            calculation_date,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use stringwatt_shared::{SENTINEL_CURRENT, SENTINEL_VOLTAGE};

    fn device() -> Device {
        Device {
            id: 1,
            plant_id: 10,
            string_count: 2,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, min, 0).unwrap()
    }

    fn sample(string_number: u32, ts: DateTime<Utc>, voltage: f64, current: f64) -> StringSample {
        StringSample {
            string_number,
            voltage,
            current,
            timestamp: ts,
        }
    }

    #[test]
    fn average_covers_only_valid_samples() {
        // Spec worked example: (10 V, 5 A) => 0.05; sentinel co-sample
        // in the same bucket must not drag the average down.
        let samples = vec![
            sample(1, at(10, 14, 0), 10.0, 5.0),
            sample(1, at(10, 14, 30), SENTINEL_VOLTAGE, 0.0),
        ];

        let rollups = hourly_averages(&device(), &samples, date());
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].string_number, 1);
        assert_eq!(rollups[0].calculation_hour, 14);
        assert_eq!(rollups[0].hourly_avg_power, 0.05);
    }

    #[test]
    fn all_sentinel_bucket_is_omitted_not_zero() {
        let samples = vec![
            sample(1, at(10, 9, 0), SENTINEL_VOLTAGE, 3.0),
            sample(1, at(10, 9, 15), 120.0, SENTINEL_CURRENT),
        ];

        let rollups = hourly_averages(&device(), &samples, date());
        assert!(rollups.is_empty());
    }

    #[test]
    fn same_clock_hour_on_different_days_shares_a_bucket() {
        let samples = vec![
            sample(1, at(9, 14, 0), 10.0, 5.0),  // 0.05
            sample(1, at(10, 14, 0), 30.0, 5.0), // 0.15
        ];

        let rollups = hourly_averages(&device(), &samples, date());
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].calculation_hour, 14);
        assert!((rollups[0].hourly_avg_power - 0.10).abs() < 1e-12);
    }

    #[test]
    fn strings_are_bucketed_independently() {
        let samples = vec![
            sample(1, at(10, 14, 0), 10.0, 5.0),
            sample(2, at(10, 14, 0), 400.0, 8.0),
        ];

        let rollups = hourly_averages(&device(), &samples, date());
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].string_number, 1);
        assert_eq!(rollups[0].hourly_avg_power, 0.05);
        assert_eq!(rollups[1].string_number, 2);
        assert_eq!(rollups[1].hourly_avg_power, 3.2);
    }

    #[test]
    fn rollups_carry_device_identity_and_run_date() {
        let samples = vec![sample(1, at(10, 7, 0), 100.0, 2.0)];

        let rollups = hourly_averages(&device(), &samples, date());
        assert_eq!(rollups[0].plant_id, 10);
        assert_eq!(rollups[0].inverter_id, 1);
        assert_eq!(rollups[0].calculation_date, date());
    }

    #[test]
    fn no_samples_means_no_rollups() {
        let rollups = hourly_averages(&device(), &[], date());
        assert!(rollups.is_empty());
    }

    #[test]
    fn power_samples_keep_hour_and_drop_date() {
        let samples = vec![sample(2, at(9, 23, 59), 10.0, 1.0)];
        let derived = power_samples(&samples);
        assert_eq!(
            derived,
            vec![PowerSample {
                string_number: 2,
                hour_of_day: 23,
                power: 0.01,
            }]
        );
    }
}
