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

//! Host Bluetooth adapter backend built on btleplug

use super::{Advertisement, Link, Radio, RadioResult, WriteKind};
use crate::error::RadioError;
use crate::protocol::DFU_SERVICE;
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

fn backend(e: btleplug::Error) -> RadioError {
    RadioError::Backend(e.to_string())
}

#[derive(Debug, Clone)]
pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    /// Open the first adapter the host reports
    pub async fn first_adapter() -> RadioResult<Self> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or_else(|| RadioError::Backend("no bluetooth adapter found".to_string()))?;
        Ok(Self { adapter })
    }

    async fn advertisements(&self) -> RadioResult<Vec<(Peripheral, Advertisement)>> {
        let mut seen = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(backend)? {
            let Some(props) = peripheral.properties().await.map_err(backend)? else {
                continue;
            };
            let adv = Advertisement {
                address: props.address.to_string(),
                local_name: props.local_name,
            };
            seen.push((peripheral, adv));
        }
        Ok(seen)
    }

    async fn scan_for(&self, timeout: Duration) -> RadioResult<Vec<(Peripheral, Advertisement)>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| RadioError::Scan(e.to_string()))?;
        tokio::time::sleep(timeout).await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }
        self.advertisements().await
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn scan(&self, timeout: Duration) -> RadioResult<Vec<Advertisement>> {
        let found = self.scan_for(timeout).await?;
        Ok(found.into_iter().map(|(_, adv)| adv).collect())
    }

    async fn connect(&self, address: &str, timeout: Duration) -> RadioResult<Box<dyn Link>> {
        let (peripheral, adv) = self
            .scan_for(timeout)
            .await?
            .into_iter()
            .find(|(_, adv)| adv.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| RadioError::NotFound(address.to_string()))?;

        peripheral.connect().await.map_err(backend)?;
        peripheral.discover_services().await.map_err(backend)?;
        if peripheral.services().iter().any(|s| s.uuid == DFU_SERVICE) {
            debug!(device = %address, "Connected, DFU service present");
        } else {
            warn!(device = %address, "Connected, but the DFU service was not discovered");
        }

        Ok(Box::new(BtleLink {
            peripheral,
            address: adv.address,
            local_name: adv.local_name,
        }))
    }

    fn name(&self) -> &str {
        "bluetooth"
    }
}

#[derive(Debug)]
pub struct BtleLink {
    peripheral: Peripheral,
    address: String,
    local_name: Option<String>,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> RadioResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(RadioError::MissingCharacteristic(uuid))
    }
}

#[async_trait]
impl Link for BtleLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    async fn request_mtu(&mut self, _mtu: u16) -> RadioResult<()> {
        // btleplug negotiates the MTU itself
        Ok(())
    }

    async fn subscribe(&mut self, characteristic: Uuid) -> RadioResult<mpsc::Receiver<Vec<u8>>> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&target).await.map_err(backend)?;
        let mut stream = self.peripheral.notifications().await.map_err(backend)?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    // Receiver dropped
                    () = tx.closed() => break,
                    next = stream.next() => match next {
                        Some(notification) => notification,
                        None => break,
                    },
                };
                if notification.uuid != characteristic {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn write(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> RadioResult<()> {
        let target = self.characteristic(characteristic)?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| RadioError::Write(e.to_string()))
    }

    async fn disconnect(&mut self) -> RadioResult<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral.disconnect().await.map_err(backend)?;
        }
        Ok(())
    }
}
