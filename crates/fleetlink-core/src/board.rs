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

//! Device-family capability dispatch
//!
//! Each [`MicroType`] maps to one `Board` variant. The orchestration pass
//! only ever talks to a `Board`; adding a family means adding a variant
//! here.

use crate::error::{FleetError, Result};
use crate::types::{MicroType, RadioType};
use fleetlink_dfu::radio::distinct_addresses;
use fleetlink_dfu::{DfuSession, DfuSettings, FirmwareImage, RadioHandle};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Discovery window used for scans and online probes
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum Board {
    /// nRF51 nodes reachable over BLE; firmware goes through the legacy DFU
    /// bootloader
    Nrf51822 {
        radio: RadioHandle,
        session: DfuSession,
        scan_timeout: Duration,
    },
    /// Families whose transport has no update path on this host
    Stub { family: MicroType },
}

impl Board {
    /// Pick the variant for a device family reached over `radio_type`
    pub fn select(
        family: MicroType,
        radio_type: RadioType,
        radio: &RadioHandle,
        settings: DfuSettings,
        scan_timeout: Duration,
    ) -> Self {
        match (family, radio_type) {
            (MicroType::Nrf51822, RadioType::Bluetooth) => Self::Nrf51822 {
                radio: radio.clone(),
                session: DfuSession::new(radio.clone(), settings),
                scan_timeout,
            },
            (family, _) => Self::Stub { family },
        }
    }

    pub fn family(&self) -> MicroType {
        match self {
            Self::Nrf51822 { .. } => MicroType::Nrf51822,
            Self::Stub { family } => *family,
        }
    }

    fn not_implemented(&self, capability: &'static str) -> FleetError {
        FleetError::NotImplemented {
            capability,
            family: self.family(),
        }
    }

    /// Flash the firmware extracted in `firmware_dir` onto `address`
    pub async fn update(&self, address: &str, firmware_dir: &Path) -> Result<()> {
        match self {
            Self::Nrf51822 { session, .. } => {
                let image = FirmwareImage::load(firmware_dir)
                    .await
                    .map_err(|source| FleetError::Update {
                        device: address.to_string(),
                        source,
                    })?;
                session
                    .update(address, image)
                    .await
                    .map_err(|source| FleetError::Update {
                        device: address.to_string(),
                        source,
                    })
            }
            Self::Stub { .. } => Err(self.not_implemented("update")),
        }
    }

    /// Distinct addresses of nodes advertising as `application_id`
    pub async fn scan(&self, application_id: &str) -> Result<BTreeSet<String>> {
        match self {
            Self::Nrf51822 {
                radio,
                scan_timeout,
                ..
            } => {
                let ads = radio.scan(*scan_timeout).await?;
                let found = distinct_addresses(
                    ads.iter()
                        .filter(|adv| adv.local_name.as_deref() == Some(application_id)),
                );
                debug!(application = %application_id, found = found.len(), "Scan finished");
                Ok(found)
            }
            Self::Stub { family } => {
                debug!(application = %application_id, "No discovery for {family}");
                Ok(BTreeSet::new())
            }
        }
    }

    pub async fn online(&self, address: &str) -> Result<bool> {
        match self {
            Self::Nrf51822 {
                radio,
                scan_timeout,
                ..
            } => Ok(radio.probe(address, *scan_timeout).await?),
            Self::Stub { .. } => Ok(false),
        }
    }

    pub async fn restart(&self, address: &str) -> Result<()> {
        match self {
            Self::Nrf51822 { session, .. } => {
                info!(device = %address, "Restarting node");
                session
                    .restart(address)
                    .await
                    .map_err(|source| FleetError::Update {
                        device: address.to_string(),
                        source,
                    })
            }
            Self::Stub { .. } => Err(self.not_implemented("restart")),
        }
    }

    pub async fn identify(&self, address: &str) -> Result<()> {
        match self {
            Self::Nrf51822 { session, .. } => {
                info!(device = %address, "Identifying node");
                session
                    .identify(address)
                    .await
                    .map_err(|source| FleetError::Update {
                        device: address.to_string(),
                        source,
                    })
            }
            Self::Stub { .. } => Err(self.not_implemented("identify")),
        }
    }

    pub async fn update_config(&self, _address: &str, _config: &Value) -> Result<()> {
        Err(self.not_implemented("update_config"))
    }

    pub async fn update_environment(&self, _address: &str, _environment: &Value) -> Result<()> {
        Err(self.not_implemented("update_environment"))
    }
}
