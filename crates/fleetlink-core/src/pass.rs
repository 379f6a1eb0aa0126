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

//! One reconciliation pass over an application's device set
//!
//! Steps, in order: resolve the target firmware, load records, scan,
//! provision unseen nodes, refresh online state, update outdated online
//! nodes, run pending commands, save everything in one batch. Provisioning
//! and command failures stay per device; any other error aborts the pass
//! before the save.

use crate::board::Board;
use crate::error::{FleetError, Result};
use crate::fleet::Fleet;
use crate::services::FirmwareSource;
use crate::types::{ApplicationRecord, DeviceRecord, DeviceStatus, MicroType};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct PassReport {
    pub application_id: String,
    /// Application has no declared micro/radio type
    pub skipped: bool,
    /// Addresses seen during the scan
    pub visible: usize,
    pub provisioned: Vec<String>,
    /// One entry per address that could not be provisioned
    pub provisioning_errors: Vec<FleetError>,
    pub online: usize,
    pub updated: Vec<String>,
    /// Restart and identify commands delivered
    pub commands: usize,
}

impl PassReport {
    fn new(application_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            ..Default::default()
        }
    }
}

/// Firmware directories resolved during this pass, by commit
#[derive(Debug, Default)]
struct FirmwareCache {
    dirs: BTreeMap<String, PathBuf>,
}

impl FirmwareCache {
    async fn resolve(
        &mut self,
        source: &dyn FirmwareSource,
        application_id: &str,
        commit: &str,
    ) -> Result<PathBuf> {
        if let Some(dir) = self.dirs.get(commit) {
            return Ok(dir.clone());
        }
        let dir = source.fetch_and_extract(application_id, commit).await?;
        self.dirs.insert(commit.to_string(), dir.clone());
        Ok(dir)
    }
}

pub(crate) async fn run(fleet: &Fleet, mut app: ApplicationRecord) -> Result<PassReport> {
    let mut report = PassReport::new(&app.id);
    let Some((micro, radio_type)) = app.declared_type() else {
        debug!(application = %app.id, "No micro/radio type declared, skipping");
        report.skipped = true;
        return Ok(report);
    };
    let services = &fleet.services;
    let board_for = |family: MicroType| {
        Board::select(
            family,
            radio_type,
            &fleet.radio,
            fleet.settings.dfu,
            fleet.settings.scan_timeout,
        )
    };

    let mut firmware = FirmwareCache::default();
    resolve_application_firmware(fleet, &mut app, &mut firmware).await?;

    let mut devices = services.store.load_devices(&app.id).await?;

    let visible = board_for(micro).scan(&app.id).await?;
    report.visible = visible.len();
    info!(application = %app.id, visible = visible.len(), known = devices.len(), "Scan complete");

    for address in &visible {
        if devices.contains_key(address) {
            continue;
        }
        match services.provisioner.provision_device(&app.id).await {
            Ok(remote_id) => {
                info!(application = %app.id, device = %address, remote_id = %remote_id, "Provisioned new device");
                devices.insert(
                    address.clone(),
                    DeviceRecord::new(address.clone(), remote_id, app.id.clone(), micro),
                );
                report.provisioned.push(address.clone());
            }
            Err(e) => {
                warn!(application = %app.id, device = %address, stage = "provision", "Provisioning failed: {e}");
                report.provisioning_errors.push(FleetError::Provisioning {
                    address: address.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    for device in devices.values_mut() {
        device.status = DeviceStatus::Offline;
        if visible.contains(&device.local_id)
            && board_for(device.micro).online(&device.local_id).await?
        {
            device.status = DeviceStatus::Online;
            device.last_seen = Some(Utc::now());
            report.online += 1;
        }
        services
            .reporter
            .report_status(&device.remote_id, device.status, device.commit.as_deref())
            .await;
    }

    let application_target = app.target_commit.clone();
    for device in devices.values_mut() {
        if !device.is_online() || !device.needs_update(application_target.as_deref()) {
            continue;
        }
        let Some(target) = device
            .effective_target(application_target.as_deref())
            .map(str::to_string)
        else {
            continue;
        };
        let dir = firmware
            .resolve(services.firmware.as_ref(), &app.id, &target)
            .await?;

        info!(
            application = %app.id,
            device = %device.local_id,
            stage = "update",
            from = device.commit.as_deref().unwrap_or("none"),
            to = %target,
            "Updating device"
        );
        services
            .reporter
            .report_log(&device.remote_id, &format!("Updating firmware to {target}"))
            .await;

        if let Err(e) = board_for(device.micro).update(&device.local_id, &dir).await {
            error!(application = %app.id, device = %device.local_id, stage = "update", "Update failed: {e}");
            services
                .reporter
                .report_log(&device.remote_id, &format!("Firmware update failed: {e}"))
                .await;
            return Err(e);
        }

        device.commit = Some(target.clone());
        services
            .reporter
            .report_log(&device.remote_id, &format!("Firmware {target} installed"))
            .await;
        services
            .reporter
            .report_status(&device.remote_id, device.status, device.commit.as_deref())
            .await;
        report.updated.push(device.local_id.clone());
    }

    for device in devices.values_mut().filter(|d| d.is_online()) {
        report.commands += run_pending_commands(&board_for(device.micro), device).await;
    }

    services.store.save_devices(&app.id, &devices).await?;
    info!(
        application = %app.id,
        devices = devices.len(),
        online = report.online,
        updated = report.updated.len(),
        "Pass complete"
    );
    Ok(report)
}

/// Make sure the application's target commit is extracted and recorded on
/// the application
async fn resolve_application_firmware(
    fleet: &Fleet,
    app: &mut ApplicationRecord,
    firmware: &mut FirmwareCache,
) -> Result<()> {
    let Some(target) = app.target_commit.clone() else {
        return Ok(());
    };

    if app.firmware_current() {
        if let Some(dir) = &app.firmware_dir {
            firmware.dirs.insert(target, dir.clone());
        }
        return Ok(());
    }

    info!(application = %app.id, commit = %target, stage = "firmware", "Fetching firmware");
    let dir = firmware
        .resolve(fleet.services.firmware.as_ref(), &app.id, &target)
        .await?;
    app.commit = Some(target);
    app.firmware_dir = Some(dir);
    fleet.services.store.save_application(app).await
}

/// Deliver identify then restart. A command that fails stays pending for
/// the next pass.
async fn run_pending_commands(board: &Board, device: &mut DeviceRecord) -> usize {
    let mut delivered = 0;

    if device.identify_pending {
        match board.identify(&device.local_id).await {
            Ok(()) => {
                device.identify_pending = false;
                delivered += 1;
            }
            Err(e) => {
                warn!(device = %device.local_id, stage = "identify", "Identify failed: {e}");
            }
        }
    }

    if device.restart_pending {
        match board.restart(&device.local_id).await {
            Ok(()) => {
                device.restart_pending = false;
                delivered += 1;
            }
            Err(e) => {
                warn!(device = %device.local_id, stage = "restart", "Restart failed: {e}");
            }
        }
    }

    delivered
}
