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

//! Shared data-model types for the per-string rollup pipeline.
//!
//! Kept dependency-light (serde + chrono only) so both the pipeline
//! and any consuming dashboard service can use the same types.

pub mod telemetry;

pub use telemetry::{
    Device, HourlyRollup, RunReport, RunStatus, SENTINEL_CURRENT, SENTINEL_VOLTAGE, StringSample,
};
