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

//! Record store backed by a single JSON file
//!
//! The whole fleet lives in memory and every mutation rewrites the file
//! through a temp file and a rename, so a crash leaves either the old or
//! the new contents on disk.

use crate::error::Result;
use async_trait::async_trait;
use fleetlink_core::{ApplicationRecord, DeviceSet, DeviceStore, FleetError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FleetFile {
    #[serde(default)]
    applications: Vec<ApplicationRecord>,
    /// Device sets keyed by application id
    #[serde(default)]
    devices: BTreeMap<String, DeviceSet>,
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<FleetFile>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let state: FleetFile = serde_json::from_str(&content)?;
                info!(
                    "Loaded {} applications from {}",
                    state.applications.len(),
                    path.display()
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store at {}, starting empty", path.display());
                FleetFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &FleetFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)?;

        // Atomic write
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!("Store written to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for JsonFileStore {
    async fn load_applications(&self) -> fleetlink_core::Result<Vec<ApplicationRecord>> {
        Ok(self.state.lock().await.applications.clone())
    }

    async fn save_application(&self, application: &ApplicationRecord) -> fleetlink_core::Result<()> {
        let mut state = self.state.lock().await;
        match state
            .applications
            .iter_mut()
            .find(|app| app.id == application.id)
        {
            Some(existing) => *existing = application.clone(),
            None => state.applications.push(application.clone()),
        }
        self.persist(&state).await.map_err(FleetError::store)
    }

    async fn load_devices(&self, application_id: &str) -> fleetlink_core::Result<DeviceSet> {
        Ok(self
            .state
            .lock()
            .await
            .devices
            .get(application_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_devices(
        &self,
        application_id: &str,
        devices: &DeviceSet,
    ) -> fleetlink_core::Result<()> {
        let mut state = self.state.lock().await;
        state
            .devices
            .insert(application_id.to_string(), devices.clone());
        self.persist(&state).await.map_err(FleetError::store)
    }

    async fn flush(&self) -> fleetlink_core::Result<()> {
        let state = self.state.lock().await;
        self.persist(&state).await.map_err(FleetError::store)
    }
}
