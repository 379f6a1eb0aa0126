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

#![allow(dead_code)]

use async_trait::async_trait;
use fleetlink_core::{
    ApplicationRecord, Collaborators, DeviceRecord, DeviceSet, DeviceStatus, DeviceStore,
    FirmwareSource, Fleet, FleetError, FleetSettings, Provisioner, StatusReporter,
};
use fleetlink_dfu::radio::{Advertisement, Link, Radio, RadioResult};
use fleetlink_dfu::sim::SimRadio;
use fleetlink_dfu::{RadioError, RadioHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Default)]
pub struct MemoryStore {
    applications: Mutex<Vec<ApplicationRecord>>,
    devices: Mutex<BTreeMap<String, DeviceSet>>,
    device_saves: Mutex<u32>,
    application_saves: Mutex<u32>,
}

impl MemoryStore {
    pub fn insert_application(&self, app: ApplicationRecord) {
        let mut apps = self.applications.lock();
        apps.retain(|a| a.id != app.id);
        apps.push(app);
    }

    pub fn insert_device(&self, device: DeviceRecord) {
        self.devices
            .lock()
            .entry(device.application_id.clone())
            .or_default()
            .insert(device.local_id.clone(), device);
    }

    pub fn application(&self, id: &str) -> ApplicationRecord {
        self.applications
            .lock()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .expect("application stored")
    }

    pub fn devices(&self, application_id: &str) -> DeviceSet {
        self.devices
            .lock()
            .get(application_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn device(&self, application_id: &str, address: &str) -> DeviceRecord {
        self.devices(application_id)
            .get(address)
            .cloned()
            .expect("device stored")
    }

    pub fn device_saves(&self) -> u32 {
        *self.device_saves.lock()
    }

    pub fn application_saves(&self) -> u32 {
        *self.application_saves.lock()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn load_applications(&self) -> fleetlink_core::Result<Vec<ApplicationRecord>> {
        Ok(self.applications.lock().clone())
    }

    async fn save_application(&self, application: &ApplicationRecord) -> fleetlink_core::Result<()> {
        *self.application_saves.lock() += 1;
        self.insert_application(application.clone());
        Ok(())
    }

    async fn load_devices(&self, application_id: &str) -> fleetlink_core::Result<DeviceSet> {
        Ok(self.devices(application_id))
    }

    async fn save_devices(
        &self,
        application_id: &str,
        devices: &DeviceSet,
    ) -> fleetlink_core::Result<()> {
        *self.device_saves.lock() += 1;
        self.devices
            .lock()
            .insert(application_id.to_string(), devices.clone());
        Ok(())
    }
}

/// Hands out `remote-1`, `remote-2`, ...; the first `failures` calls fail
#[derive(Debug, Default)]
pub struct CountingProvisioner {
    calls: Mutex<u32>,
    failures: Mutex<u32>,
}

impl CountingProvisioner {
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    async fn provision_device(&self, _application_id: &str) -> fleetlink_core::Result<String> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(FleetError::Store("provisioning backend unavailable".to_string()));
        }
        Ok(format!("remote-{call}"))
    }
}

/// Writes a small image per commit into a temp directory
#[derive(Debug)]
pub struct DirFirmware {
    root: TempDir,
    fetches: Mutex<Vec<String>>,
    broken: Mutex<BTreeSet<String>>,
}

impl DirFirmware {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("temp dir"),
            fetches: Mutex::new(Vec::new()),
            broken: Mutex::new(BTreeSet::new()),
        }
    }

    /// Image bytes served for `commit`
    pub fn image_for(commit: &str) -> Vec<u8> {
        commit.bytes().cycle().take(640).collect()
    }

    pub fn break_commit(&self, commit: &str) {
        self.broken.lock().insert(commit.to_string());
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl FirmwareSource for DirFirmware {
    async fn fetch_and_extract(
        &self,
        _application_id: &str,
        commit: &str,
    ) -> fleetlink_core::Result<PathBuf> {
        self.fetches.lock().push(commit.to_string());
        if self.broken.lock().contains(commit) {
            return Err(FleetError::Firmware {
                commit: commit.to_string(),
                message: "checksum mismatch".to_string(),
            });
        }
        let dir = self.root.path().join(commit);
        std::fs::create_dir_all(&dir).map_err(FleetError::store)?;
        std::fs::write(dir.join("application.bin"), Self::image_for(commit))
            .map_err(FleetError::store)?;
        std::fs::write(dir.join("application.dat"), [0x01; 14]).map_err(FleetError::store)?;
        Ok(dir)
    }
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub statuses: Mutex<Vec<(String, DeviceStatus, Option<String>)>>,
    pub logs: Mutex<Vec<(String, String)>>,
}

impl RecordingReporter {
    pub fn logs_for(&self, remote_id: &str) -> Vec<String> {
        self.logs
            .lock()
            .iter()
            .filter(|(id, _)| id == remote_id)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report_status(&self, remote_id: &str, status: DeviceStatus, commit: Option<&str>) {
        self.statuses
            .lock()
            .push((remote_id.to_string(), status, commit.map(str::to_string)));
    }

    async fn report_log(&self, remote_id: &str, message: &str) {
        self.logs
            .lock()
            .push((remote_id.to_string(), message.to_string()));
    }
}

/// Simulated radio whose online probes always fail
#[derive(Debug)]
pub struct ProbeFailingRadio(pub SimRadio);

#[async_trait]
impl Radio for ProbeFailingRadio {
    async fn scan(&self, timeout: Duration) -> RadioResult<Vec<Advertisement>> {
        self.0.scan(timeout).await
    }

    async fn connect(&self, address: &str, timeout: Duration) -> RadioResult<Box<dyn Link>> {
        self.0.connect(address, timeout).await
    }

    async fn probe(&self, _address: &str, _timeout: Duration) -> RadioResult<bool> {
        Err(RadioError::Backend("adapter powered off".to_string()))
    }

    fn name(&self) -> &str {
        "probe-failing"
    }
}

pub struct Harness {
    pub fleet: Fleet,
    pub store: Arc<MemoryStore>,
    pub provisioner: Arc<CountingProvisioner>,
    pub firmware: Arc<DirFirmware>,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        let store = Arc::new(MemoryStore::default());
        let provisioner = Arc::new(CountingProvisioner::default());
        let firmware = Arc::new(DirFirmware::new());
        let reporter = Arc::new(RecordingReporter::default());
        let services = Collaborators {
            store: store.clone(),
            provisioner: provisioner.clone(),
            firmware: firmware.clone(),
            reporter: reporter.clone(),
        };
        let fleet = Fleet::new(services, RadioHandle::new(radio), FleetSettings::default());
        Self {
            fleet,
            store,
            provisioner,
            firmware,
            reporter,
        }
    }

    pub fn with_sim(radio: &SimRadio) -> Self {
        Self::new(Arc::new(radio.clone()))
    }
}
