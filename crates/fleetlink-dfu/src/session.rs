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

//! Connection state machine
//!
//! One `DfuSession` call sequences a peripheral through discovery, the
//! optional bootloader-mode detour, the transfer and teardown. A driver task
//! owns the link for each connection and reports what happens on two
//! channels: lifecycle transitions and errors. The loop in
//! [`DfuSession::drive`] is the only place that decides what happens next.

use crate::engine::{DfuEngine, DfuSettings};
use crate::error::{DfuError, Result};
use crate::firmware::FirmwareImage;
use crate::protocol::{
    self, BOOTLOADER_NAME, COMMAND_IDENTIFY, COMMAND_RESTART, DFU_CONTROL_POINT,
    IMAGE_TYPE_APPLICATION, NODE_CONTROL, OpCode,
};
use crate::radio::{Connection, RadioHandle, WriteKind};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Lifecycle transitions reported by a driver task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connected,
    /// Name inspected; `restart` means a bootloader switch was requested
    /// and the peripheral must be rediscovered
    ModeChecked { restart: bool },
    Disconnected,
}

/// What a driver task does once its link is up
#[derive(Debug, Clone)]
enum Purpose {
    /// Switch to bootloader mode unless already there, then transfer
    RequestBootloader,
    Transfer,
    Command(u8),
}

#[derive(Debug, Clone)]
pub struct DfuSession {
    radio: RadioHandle,
    settings: DfuSettings,
}

impl DfuSession {
    pub fn new(radio: RadioHandle, settings: DfuSettings) -> Self {
        Self { radio, settings }
    }

    /// Push `image` to the node at `address`, detouring through bootloader
    /// mode when the node is still running its application
    pub async fn update(&self, address: &str, image: FirmwareImage) -> Result<()> {
        info!(device = %address, size = image.size, "Starting firmware update");
        let image = Arc::new(Mutex::new(image));
        self.drive(address, Purpose::RequestBootloader, Some(image))
            .await?;
        info!(device = %address, "Firmware update finished");
        Ok(())
    }

    pub async fn restart(&self, address: &str) -> Result<()> {
        self.drive(address, Purpose::Command(COMMAND_RESTART), None)
            .await
    }

    pub async fn identify(&self, address: &str) -> Result<()> {
        self.drive(address, Purpose::Command(COMMAND_IDENTIFY), None)
            .await
    }

    async fn drive(
        &self,
        address: &str,
        purpose: Purpose,
        image: Option<Arc<Mutex<FirmwareImage>>>,
    ) -> Result<()> {
        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();

        let mut driver = self.spawn_driver(
            address,
            purpose,
            image.clone(),
            state_tx.clone(),
            error_tx.clone(),
        );
        let mut driver_done = false;
        let mut restart = false;
        let mut latched: Option<DfuError> = None;

        loop {
            tokio::select! {
                biased;

                Some(error) = error_rx.recv() => {
                    warn!(device = %address, "Update error: {error}");
                    latched.get_or_insert(error);
                }
                Some(state) = state_rx.recv() => match state {
                    LinkState::Connected => debug!(device = %address, "Connected"),
                    LinkState::ModeChecked { restart: r } => restart = r,
                    LinkState::Disconnected => {
                        debug!(device = %address, "Disconnected");
                        if !restart || latched.is_some() {
                            break;
                        }
                        restart = false;
                        tokio::time::sleep(self.settings.mode_switch_delay).await;
                        info!(device = %address, "Reconnecting in bootloader mode");
                        driver = self.spawn_driver(
                            address,
                            Purpose::Transfer,
                            image.clone(),
                            state_tx.clone(),
                            error_tx.clone(),
                        );
                        driver_done = false;
                    }
                },
                joined = &mut driver, if !driver_done => {
                    driver_done = true;
                    if let Err(e) = joined {
                        latched.get_or_insert(DfuError::Aborted(format!("driver task failed: {e}")));
                        break;
                    }
                }
            }
        }

        match latched {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn spawn_driver(
        &self,
        address: &str,
        purpose: Purpose,
        image: Option<Arc<Mutex<FirmwareImage>>>,
        state_tx: mpsc::UnboundedSender<LinkState>,
        error_tx: mpsc::UnboundedSender<DfuError>,
    ) -> tokio::task::JoinHandle<()> {
        let radio = self.radio.clone();
        let settings = self.settings;
        let address = address.to_string();

        tokio::spawn(async move {
            let connection = match radio
                .connect(&address, settings.discovery_timeout)
                .await
            {
                Ok(connection) => connection,
                Err(e) => {
                    let _ = error_tx.send(e.into());
                    let _ = state_tx.send(LinkState::Disconnected);
                    return;
                }
            };
            let _ = state_tx.send(LinkState::Connected);

            let mut driver = Driver {
                connection,
                settings,
                state_tx: &state_tx,
            };
            if let Err(e) = driver.run(purpose, image).await {
                let _ = error_tx.send(e);
            }

            if let Err(e) = driver.connection.close().await {
                debug!(device = %address, "Disconnect reported: {e}");
            }
            let _ = state_tx.send(LinkState::Disconnected);
        })
    }
}

struct Driver<'a> {
    connection: Connection,
    settings: DfuSettings,
    state_tx: &'a mpsc::UnboundedSender<LinkState>,
}

impl Driver<'_> {
    async fn run(
        &mut self,
        purpose: Purpose,
        image: Option<Arc<Mutex<FirmwareImage>>>,
    ) -> Result<()> {
        let link = self.connection.link.as_mut();
        link.request_mtu(protocol::PREFERRED_MTU).await?;

        match purpose {
            Purpose::RequestBootloader => {
                if link.local_name() == Some(BOOTLOADER_NAME) {
                    debug!(device = %link.address(), "Already in bootloader mode");
                    let _ = self.state_tx.send(LinkState::ModeChecked { restart: false });
                    self.transfer(image).await
                } else {
                    self.request_bootloader().await?;
                    let _ = self.state_tx.send(LinkState::ModeChecked { restart: true });
                    Ok(())
                }
            }
            Purpose::Transfer => self.transfer(image).await,
            Purpose::Command(command) => {
                link.write(NODE_CONTROL, &[command], WriteKind::WithResponse)
                    .await?;
                debug!(device = %link.address(), command, "Command written");
                Ok(())
            }
        }
    }

    /// Ask the application to reboot into its bootloader. The node resets
    /// on its own once the request lands.
    async fn request_bootloader(&mut self) -> Result<()> {
        let link = self.connection.link.as_mut();
        info!(device = %link.address(), "Requesting bootloader mode");
        let _notifications = link.subscribe(DFU_CONTROL_POINT).await?;
        link.write(
            DFU_CONTROL_POINT,
            &[OpCode::Start as u8, IMAGE_TYPE_APPLICATION],
            WriteKind::WithResponse,
        )
        .await?;
        Ok(())
    }

    async fn transfer(&mut self, image: Option<Arc<Mutex<FirmwareImage>>>) -> Result<()> {
        let image = image.ok_or_else(|| DfuError::Aborted("no firmware image".to_string()))?;
        let mut image = image.lock().await;
        let mut engine =
            DfuEngine::attach(self.connection.link.as_mut(), self.settings).await?;
        engine.run(&mut image).await
    }
}
