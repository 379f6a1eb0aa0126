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

//! Periodic fleet loop
//!
//! Wires the configured collaborators into a [`Fleet`] and runs a pass per
//! application on every tick until shutdown is signalled.

use crate::api::FleetApiClient;
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::firmware::HttpFirmwareSource;
use crate::store::JsonFileStore;
use fleetlink_core::{Collaborators, DeviceStore, Fleet};
use fleetlink_dfu::{Radio, RadioHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct Runtime {
    fleet: Arc<Fleet>,
    store: Arc<JsonFileStore>,
    api: Arc<FleetApiClient>,
    config: SupervisorConfig,
}

impl Runtime {
    /// Open the store under the data directory and declare the configured
    /// applications
    pub async fn build(config: SupervisorConfig, radio: Arc<dyn Radio>) -> Result<Self> {
        let store = Arc::new(JsonFileStore::open(config.store_path()).await?);
        let api = Arc::new(FleetApiClient::new(
            config.api_base_url.clone(),
            config.api_key.clone(),
        )?);
        let firmware = Arc::new(HttpFirmwareSource::new(
            config.api_base_url.clone(),
            config.api_key.clone(),
            config.firmware_root(),
        )?);

        let services = Collaborators {
            store: store.clone(),
            provisioner: api.clone(),
            firmware,
            reporter: api.clone(),
        };
        let fleet = Arc::new(Fleet::new(
            services,
            RadioHandle::new(radio),
            config.fleet_settings(),
        ));

        for app in &config.applications {
            fleet.declare_application(app.to_record()).await?;
        }
        info!(
            "Fleet ready with {} declared applications",
            config.applications.len()
        );

        Ok(Self {
            fleet,
            store,
            api,
            config,
        })
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// Pull each application's target commit from the fleet API
    pub async fn refresh_targets(&self) {
        let applications = match self.fleet.applications().await {
            Ok(applications) => applications,
            Err(e) => {
                error!("Failed to load applications: {e}");
                return;
            }
        };

        for app in applications {
            match self.api.target_commit(&app.id).await {
                Ok(Some(commit)) => {
                    if let Err(e) = self.fleet.set_application_target(&app.id, &commit).await {
                        error!(application = %app.id, "Failed to store target commit: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(application = %app.id, "Target commit refresh failed: {e}"),
            }
        }
    }

    /// Refresh targets then run one pass per application
    pub async fn run_cycle(&self) {
        info!("Running fleet cycle");
        self.refresh_targets().await;

        let results = self.fleet.run_all().await;
        let failed = results.iter().filter(|(_, result)| result.is_err()).count();
        for (application, result) in &results {
            if let Ok(report) = result
                && !report.skipped
            {
                info!(
                    application = %application,
                    visible = report.visible,
                    online = report.online,
                    provisioned = report.provisioned.len(),
                    updated = report.updated.len(),
                    "Application summary"
                );
            }
        }
        info!(
            "Fleet cycle finished: {} applications, {failed} failed",
            results.len()
        );
    }

    /// Run cycles on the configured interval until `shutdown` fires. With
    /// `once` a single cycle runs and the loop exits.
    pub async fn run(&self, shutdown: Arc<Notify>, once: bool) -> Result<()> {
        if once {
            self.run_cycle().await;
            return self.shutdown().await;
        }

        let mut pass_interval =
            tokio::time::interval(Duration::from_secs(self.config.pass_interval_secs));
        pass_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = pass_interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        self.shutdown().await
    }

    /// Write the store one last time
    pub async fn shutdown(&self) -> Result<()> {
        self.store.flush().await?;
        info!("Store flushed to {}", self.store.path().display());
        Ok(())
    }
}
