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

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use stringwatt_core::{PipelineConfig, SchedulerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    /// Daily run time, UTC, "HH:MM".
    #[serde(default = "default_run_at")]
    pub run_at: String,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_max_string_count")]
    pub max_string_count: i64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_db_path() -> String {
    "./data/stringwatt.db".to_owned()
}

fn default_run_at() -> String {
    "02:00".to_owned()
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_window_days() -> i64 {
    7
}

fn default_max_string_count() -> i64 {
    64
}

fn default_retention_days() -> u32 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            max_string_count: default_max_string_count(),
            retention_days: default_retention_days(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!("Config file {path} not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse {path} as TOML"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.scheduler_config()?;
        if self.pipeline.window_days < 1 {
            bail!("pipeline.window_days must be at least 1");
        }
        if self.pipeline.max_string_count < 0 {
            bail!("pipeline.max_string_count must not be negative");
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let run_at = NaiveTime::parse_from_str(&self.schedule.run_at, "%H:%M").with_context(
            || format!("schedule.run_at '{}' is not HH:MM", self.schedule.run_at),
        )?;
        Ok(SchedulerConfig {
            run_at,
            run_timeout_secs: self.schedule.run_timeout_secs,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            window_days: self.pipeline.window_days,
            max_string_count: self.pipeline.max_string_count,
            retention_days: self.pipeline.retention_days,
        }
    }
}
