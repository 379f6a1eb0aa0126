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

//! Fleet context
//!
//! Owns the collaborators and the shared radio, and is the only way into
//! the persisted records. A pass and the record mutators below serialize on
//! one lock so a pass never races a mutation it would later overwrite with
//! its batch save.

use crate::board::SCAN_TIMEOUT;
use crate::error::{FleetError, Result};
use crate::pass::{self, PassReport};
use crate::services::{DeviceStore, FirmwareSource, Provisioner, StatusReporter};
use crate::types::{ApplicationRecord, DeviceRecord};
use fleetlink_dfu::{DfuSettings, RadioHandle};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DeviceStore>,
    pub provisioner: Arc<dyn Provisioner>,
    pub firmware: Arc<dyn FirmwareSource>,
    pub reporter: Arc<dyn StatusReporter>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FleetSettings {
    pub dfu: DfuSettings,
    pub scan_timeout: Duration,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            dfu: DfuSettings::default(),
            scan_timeout: SCAN_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct Fleet {
    pub(crate) services: Collaborators,
    pub(crate) radio: RadioHandle,
    pub(crate) settings: FleetSettings,
    records: Mutex<()>,
}

impl Fleet {
    pub fn new(services: Collaborators, radio: RadioHandle, settings: FleetSettings) -> Self {
        Self {
            services,
            radio,
            settings,
            records: Mutex::new(()),
        }
    }

    pub async fn applications(&self) -> Result<Vec<ApplicationRecord>> {
        let _records = self.records.lock().await;
        self.services.store.load_applications().await
    }

    /// Insert a declared application, or refresh the name and type of a
    /// stored one while keeping its firmware state
    pub async fn declare_application(&self, declared: ApplicationRecord) -> Result<()> {
        let _records = self.records.lock().await;
        let existing = self
            .services
            .store
            .load_applications()
            .await?
            .into_iter()
            .find(|app| app.id == declared.id);

        let record = match existing {
            Some(mut app) => {
                app.name = declared.name;
                app.micro = declared.micro;
                app.radio = declared.radio;
                app
            }
            None => declared,
        };
        self.services.store.save_application(&record).await
    }

    /// Record the commit the application's nodes should run
    pub async fn set_application_target(&self, application_id: &str, commit: &str) -> Result<()> {
        let _records = self.records.lock().await;
        let mut app = self.find_application(application_id).await?;
        if app.target_commit.as_deref() == Some(commit) {
            return Ok(());
        }
        info!(application = %application_id, commit, "Target commit changed");
        app.target_commit = Some(commit.to_string());
        self.services.store.save_application(&app).await
    }

    /// Run one pass for `application_id`
    pub async fn run_pass(&self, application_id: &str) -> Result<PassReport> {
        let _records = self.records.lock().await;
        let app = self.find_application(application_id).await?;
        pass::run(self, app).await
    }

    /// Run a pass for every stored application, one after another. A failed
    /// pass is logged and does not stop the others.
    pub async fn run_all(&self) -> Vec<(String, Result<PassReport>)> {
        let applications = match self.applications().await {
            Ok(applications) => applications,
            Err(e) => {
                error!("Failed to load applications: {e}");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(applications.len());
        for app in applications {
            let result = self.run_pass(&app.id).await;
            if let Err(e) = &result {
                error!(application = %app.id, "Pass failed: {e}");
            }
            results.push((app.id, result));
        }
        results
    }

    pub async fn set_target_commit(
        &self,
        device_id: &str,
        commit: Option<String>,
    ) -> Result<DeviceRecord> {
        self.modify_device(device_id, |device| device.target_commit = commit)
            .await
    }

    pub async fn request_restart(&self, device_id: &str) -> Result<DeviceRecord> {
        self.modify_device(device_id, |device| device.restart_pending = true)
            .await
    }

    pub async fn request_identify(&self, device_id: &str) -> Result<DeviceRecord> {
        self.modify_device(device_id, |device| device.identify_pending = true)
            .await
    }

    /// Look a device up by its remote id
    pub async fn get_device(&self, device_id: &str) -> Result<DeviceRecord> {
        self.list_devices()
            .await?
            .into_iter()
            .find(|device| device.remote_id == device_id)
            .ok_or_else(|| FleetError::UnknownDevice(device_id.to_string()))
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let _records = self.records.lock().await;
        let mut all = Vec::new();
        for app in self.services.store.load_applications().await? {
            let devices = self.services.store.load_devices(&app.id).await?;
            all.extend(devices.into_values());
        }
        Ok(all)
    }

    async fn find_application(&self, application_id: &str) -> Result<ApplicationRecord> {
        self.services
            .store
            .load_applications()
            .await?
            .into_iter()
            .find(|app| app.id == application_id)
            .ok_or_else(|| FleetError::UnknownApplication(application_id.to_string()))
    }

    async fn modify_device(
        &self,
        device_id: &str,
        change: impl FnOnce(&mut DeviceRecord),
    ) -> Result<DeviceRecord> {
        let _records = self.records.lock().await;
        for app in self.services.store.load_applications().await? {
            let mut devices = self.services.store.load_devices(&app.id).await?;
            let Some(device) = devices.values_mut().find(|d| d.remote_id == device_id) else {
                continue;
            };
            change(device);
            let updated = device.clone();
            self.services.store.save_devices(&app.id, &devices).await?;
            return Ok(updated);
        }
        Err(FleetError::UnknownDevice(device_id.to_string()))
    }
}
