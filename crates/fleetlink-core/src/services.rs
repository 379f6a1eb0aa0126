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

//! Collaborators the fleet pass consumes

use crate::error::Result;
use crate::types::{ApplicationRecord, DeviceSet, DeviceStatus};
use async_trait::async_trait;
use std::path::PathBuf;

/// Persisted application and device records
///
/// Every call is expected to be atomic; the pass never relies on partial
/// writes.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn load_applications(&self) -> Result<Vec<ApplicationRecord>>;

    async fn save_application(&self, application: &ApplicationRecord) -> Result<()>;

    async fn load_devices(&self, application_id: &str) -> Result<DeviceSet>;

    /// Replace the application's whole device set
    async fn save_devices(&self, application_id: &str, devices: &DeviceSet) -> Result<()>;

    /// Write any buffered state to durable storage
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Register a new node under `application_id` and return its remote id
    async fn provision_device(&self, application_id: &str) -> Result<String>;
}

#[async_trait]
pub trait FirmwareSource: Send + Sync {
    /// Make the firmware for `commit` available on disk and return the
    /// directory holding it. Calling it again for the same commit is cheap.
    async fn fetch_and_extract(&self, application_id: &str, commit: &str) -> Result<PathBuf>;
}

/// Fire-and-forget status and log reporting; implementations log their own
/// failures
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_status(&self, remote_id: &str, status: DeviceStatus, commit: Option<&str>);

    async fn report_log(&self, remote_id: &str, message: &str);
}

/// Reporter that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

#[async_trait]
impl StatusReporter for NullReporter {
    async fn report_status(&self, _remote_id: &str, _status: DeviceStatus, _commit: Option<&str>) {}

    async fn report_log(&self, _remote_id: &str, _message: &str) {}
}
