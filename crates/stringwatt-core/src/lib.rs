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

//! Core of the per-string hourly rollup pipeline.
//!
//! The pipeline runs once per day (or on demand): it loads the
//! inverter catalog, reads each inverter's per-string voltage/current
//! samples over a trailing window, drops sensor-sentinel readings,
//! averages instantaneous power per (string, hour-of-day) bucket and
//! upserts the resulting rollup rows in a single transaction.

pub mod aggregate;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod store;

pub use error::{PipelineError, Result};
pub use pipeline::{PipelineConfig, run_pipeline};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{SampleWindow, SqliteStore, TelemetryStore};
