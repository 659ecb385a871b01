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

//! Error taxonomy for the rollup pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Device catalog unreachable or its query failed. Fatal to the
    /// run: every device must be visited to produce complete rollups,
    /// so no partial catalog is acceptable.
    #[error("device catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// A device's string count is negative or unreasonably large.
    /// The device is skipped; the run continues.
    #[error("invalid string configuration for inverter {inverter_id}: {reason}")]
    DeviceConfigInvalid { inverter_id: i64, reason: String },

    /// Raw telemetry read failed for one device. Isolated per device
    /// so one bad device does not prevent rollups for the rest.
    #[error("sample read failed for inverter {inverter_id}: {reason}")]
    SampleReadFailure { inverter_id: i64, reason: String },

    /// Rollup persistence failed. Fatal to the run; the transactional
    /// write guarantees no half-written rollups for the date.
    #[error("rollup write failed: {0}")]
    WriteFailure(String),

    /// A trigger fired while another run held the run-lock.
    #[error("pipeline run already in progress")]
    RunInProgress,

    /// The run was cancelled (shutdown or run timeout) before its
    /// rollups were committed.
    #[error("pipeline run cancelled before completion")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
