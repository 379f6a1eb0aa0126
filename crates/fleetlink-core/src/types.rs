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

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Device family; selects the [`crate::Board`] variant for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MicroType {
    /// Nordic nRF51822, updated over BLE with the legacy DFU bootloader
    Nrf51822,
    /// Espressif ESP8266
    Esp8266,
}

impl MicroType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Nrf51822 => "nRF51822",
            Self::Esp8266 => "ESP8266",
        }
    }

    pub fn to_config_value(&self) -> &'static str {
        match self {
            Self::Nrf51822 => "nrf51822",
            Self::Esp8266 => "esp8266",
        }
    }

    pub fn all() -> &'static [MicroType] {
        &[Self::Nrf51822, Self::Esp8266]
    }
}

impl fmt::Display for MicroType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for MicroType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nrf51822" => Ok(Self::Nrf51822),
            "esp8266" => Ok(Self::Esp8266),
            _ => Err(anyhow::anyhow!(
                "Unknown micro type: '{}'. Supported types: {}",
                s,
                Self::all()
                    .iter()
                    .map(MicroType::to_config_value)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// Transport the application's nodes are reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RadioType {
    Bluetooth,
    Serial,
    Mesh,
    Http,
}

impl RadioType {
    pub fn to_config_value(&self) -> &'static str {
        match self {
            Self::Bluetooth => "bluetooth",
            Self::Serial => "serial",
            Self::Mesh => "mesh",
            Self::Http => "http",
        }
    }

    pub fn all() -> &'static [RadioType] {
        &[Self::Bluetooth, Self::Serial, Self::Mesh, Self::Http]
    }
}

impl fmt::Display for RadioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_config_value())
    }
}

impl FromStr for RadioType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bluetooth" | "ble" => Ok(Self::Bluetooth),
            "serial" => Ok(Self::Serial),
            "mesh" => Ok(Self::Mesh),
            "http" => Ok(Self::Http),
            _ => Err(anyhow::anyhow!(
                "Unknown radio type: '{}'. Supported types: {}",
                s,
                Self::all()
                    .iter()
                    .map(RadioType::to_config_value)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// One provisioned node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Transport address, unique within the application
    pub local_id: String,
    /// Identity assigned by the fleet API at provisioning
    pub remote_id: String,
    pub application_id: String,
    /// Firmware commit the node is running
    #[serde(default)]
    pub commit: Option<String>,
    /// Commit pinned for this node; overrides the application target
    #[serde(default)]
    pub target_commit: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    pub micro: MicroType,
    #[serde(default)]
    pub restart_pending: bool,
    #[serde(default)]
    pub identify_pending: bool,
}

impl DeviceRecord {
    pub fn new(
        local_id: impl Into<String>,
        remote_id: impl Into<String>,
        application_id: impl Into<String>,
        micro: MicroType,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            application_id: application_id.into(),
            commit: None,
            target_commit: None,
            status: DeviceStatus::Offline,
            last_seen: None,
            micro,
            restart_pending: false,
            identify_pending: false,
        }
    }

    /// Pinned commit if any, otherwise the application's target
    pub fn effective_target<'a>(&'a self, application_target: Option<&'a str>) -> Option<&'a str> {
        self.target_commit.as_deref().or(application_target)
    }

    pub fn needs_update(&self, application_target: Option<&str>) -> bool {
        match self.effective_target(application_target) {
            Some(target) => self.commit.as_deref() != Some(target),
            None => false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// Device records of one application keyed by transport address
pub type DeviceSet = BTreeMap<String, DeviceRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: String,
    pub name: String,
    /// Commit whose firmware is extracted in `firmware_dir`
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub firmware_dir: Option<PathBuf>,
    #[serde(default)]
    pub target_commit: Option<String>,
    #[serde(default)]
    pub micro: Option<MicroType>,
    #[serde(default)]
    pub radio: Option<RadioType>,
}

impl ApplicationRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            commit: None,
            firmware_dir: None,
            target_commit: None,
            micro: None,
            radio: None,
        }
    }

    #[must_use]
    pub fn with_type(mut self, micro: MicroType, radio: RadioType) -> Self {
        self.micro = Some(micro);
        self.radio = Some(radio);
        self
    }

    /// Declared (micro, radio) pair, or `None` while the application is
    /// not yet actionable
    pub fn declared_type(&self) -> Option<(MicroType, RadioType)> {
        Some((self.micro?, self.radio?))
    }

    /// Whether the extracted firmware already matches the target commit
    pub fn firmware_current(&self) -> bool {
        self.firmware_dir.is_some()
            && self.target_commit.is_some()
            && self.commit == self.target_commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micro_type_from_str() {
        assert_eq!("nRF51822".parse::<MicroType>().unwrap(), MicroType::Nrf51822);
        assert_eq!("esp8266".parse::<MicroType>().unwrap(), MicroType::Esp8266);
        let err = "avr".parse::<MicroType>().unwrap_err();
        assert!(err.to_string().contains("nrf51822, esp8266"));
    }

    #[test]
    fn test_radio_type_round_trip_through_config_value() {
        for radio in RadioType::all() {
            assert_eq!(radio.to_config_value().parse::<RadioType>().unwrap(), *radio);
        }
        assert_eq!("BLE".parse::<RadioType>().unwrap(), RadioType::Bluetooth);
    }

    #[test]
    fn test_effective_target_prefers_pinned_commit() {
        let mut device = DeviceRecord::new("aa:01", "r-1", "app", MicroType::Nrf51822);
        assert_eq!(device.effective_target(Some("abc")), Some("abc"));

        device.target_commit = Some("pinned".to_string());
        assert_eq!(device.effective_target(Some("abc")), Some("pinned"));
        assert_eq!(device.effective_target(None), Some("pinned"));
    }

    #[test]
    fn test_needs_update_only_on_commit_difference() {
        let mut device = DeviceRecord::new("aa:01", "r-1", "app", MicroType::Nrf51822);
        assert!(!device.needs_update(None));
        assert!(device.needs_update(Some("abc")));

        device.commit = Some("abc".to_string());
        assert!(!device.needs_update(Some("abc")));
    }

    #[test]
    fn test_declared_type_requires_both_halves() {
        let mut app = ApplicationRecord::new("app", "App");
        assert_eq!(app.declared_type(), None);

        app.micro = Some(MicroType::Nrf51822);
        assert_eq!(app.declared_type(), None);

        let app = app.with_type(MicroType::Nrf51822, RadioType::Bluetooth);
        assert_eq!(
            app.declared_type(),
            Some((MicroType::Nrf51822, RadioType::Bluetooth))
        );
    }

    #[test]
    fn test_device_record_defaults_when_deserialized() {
        let json = r#"{
            "local_id": "aa:01",
            "remote_id": "r-1",
            "application_id": "app",
            "micro": "nrf51822"
        }"#;
        let device: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        assert!(device.commit.is_none());
        assert!(!device.restart_pending);
    }
}
