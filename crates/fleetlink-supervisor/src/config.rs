// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FleetLink.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Supervisor configuration

use crate::error::{Result, SupervisorError};
use fleetlink_core::{ApplicationRecord, FleetSettings, MicroType, RadioType};
use fleetlink_dfu::DfuSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const STORE_FILE: &str = "fleet.json";
pub const FIRMWARE_DIR: &str = "firmware";

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data/fleetlink")
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_60() -> u64 {
    60
}

fn default_10() -> u64 {
    10
}

fn default_1000() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Holds the record store and extracted firmware
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Seconds between fleet passes
    #[serde(default = "default_60")]
    pub pass_interval_secs: u64,

    #[serde(default = "default_10")]
    pub scan_timeout_secs: u64,

    #[serde(default = "default_10")]
    pub notification_timeout_secs: u64,

    /// Pause before reconnecting to a node that just entered its bootloader
    #[serde(default = "default_1000")]
    pub mode_switch_delay_ms: u64,

    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub micro: Option<MicroType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio: Option<RadioType>,
}

impl ApplicationConfig {
    pub fn to_record(&self) -> ApplicationRecord {
        let mut record = ApplicationRecord::new(&self.id, &self.name);
        record.micro = self.micro;
        record.radio = self.radio;
        record
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_base_url: default_api_base_url(),
            api_key: None,
            pass_interval_secs: 60,
            scan_timeout_secs: 10,
            notification_timeout_secs: 10,
            mode_switch_delay_ms: 1000,
            applications: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Load from `path` when given, otherwise start from defaults. Process
    /// environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let config = Self::from_file(path)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => {
                info!("No configuration file given, using defaults with environment overrides");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a `.toml` file, or JSON for any other extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SupervisorError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            Ok(toml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    /// Override fields from `FLEETLINK_*` variables resolved through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FLEETLINK_API_URL") {
            self.api_base_url = url;
        }
        if let Some(key) = lookup("FLEETLINK_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(dir) = lookup("FLEETLINK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(interval) = lookup("FLEETLINK_PASS_INTERVAL_SECS")
            && let Ok(secs) = interval.parse::<u64>()
        {
            self.pass_interval_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(SupervisorError::Config(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        if self.pass_interval_secs == 0 {
            return Err(SupervisorError::Config(
                "pass_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scan_timeout_secs == 0 || self.notification_timeout_secs == 0 {
            return Err(SupervisorError::Config(
                "scan and notification timeouts must be greater than zero".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for app in &self.applications {
            if app.id.trim().is_empty() {
                return Err(SupervisorError::Config(
                    "application id must not be empty".to_string(),
                ));
            }
            if !seen.insert(app.id.as_str()) {
                return Err(SupervisorError::Config(format!(
                    "application '{}' declared twice",
                    app.id
                )));
            }
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    pub fn firmware_root(&self) -> PathBuf {
        self.data_dir.join(FIRMWARE_DIR)
    }

    pub fn fleet_settings(&self) -> FleetSettings {
        FleetSettings {
            dfu: DfuSettings {
                notification_timeout: Duration::from_secs(self.notification_timeout_secs),
                discovery_timeout: Duration::from_secs(self.scan_timeout_secs),
                mode_switch_delay: Duration::from_millis(self.mode_switch_delay_ms),
                ..DfuSettings::default()
            },
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
        }
    }
}
