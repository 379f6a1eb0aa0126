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

//! Wireless transport seam
//!
//! A `Radio` discovers peripherals and opens `Link`s to them. Backends only
//! have to provide the primitive operations; connection sequencing lives in
//! [`crate::session`].

#[cfg(feature = "btleplug")]
pub mod btle;

use crate::error::RadioError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use uuid::Uuid;

pub type RadioResult<T> = std::result::Result<T, RadioError>;

/// One advertisement observed during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub local_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

#[async_trait]
pub trait Radio: Send + Sync + fmt::Debug {
    /// Listen for `timeout` and return everything that advertised
    async fn scan(&self, timeout: Duration) -> RadioResult<Vec<Advertisement>>;

    /// Scan until `address` advertises, then connect to it
    async fn connect(&self, address: &str, timeout: Duration) -> RadioResult<Box<dyn Link>>;

    /// Whether `address` advertises within `timeout`
    async fn probe(&self, address: &str, timeout: Duration) -> RadioResult<bool> {
        let seen = self.scan(timeout).await?;
        Ok(seen.iter().any(|adv| adv.address == address))
    }

    /// Backend name for logging
    fn name(&self) -> &str;
}

#[async_trait]
pub trait Link: Send + fmt::Debug {
    fn address(&self) -> &str;

    /// Name the peripheral advertised when it was connected
    fn local_name(&self) -> Option<&str>;

    /// Ask for a larger ATT MTU. Backends that negotiate on their own may
    /// treat this as a no-op.
    async fn request_mtu(&mut self, mtu: u16) -> RadioResult<()>;

    /// Enable notifications on `characteristic`; frames arrive on the
    /// returned receiver in order
    async fn subscribe(&mut self, characteristic: Uuid) -> RadioResult<mpsc::Receiver<Vec<u8>>>;

    async fn write(&mut self, characteristic: Uuid, data: &[u8], kind: WriteKind)
    -> RadioResult<()>;

    /// Tear the link down. Calling it on a dropped link is not an error.
    async fn disconnect(&mut self) -> RadioResult<()>;
}

/// Distinct addresses from a list of advertisements, in address order
pub fn distinct_addresses<'a>(ads: impl IntoIterator<Item = &'a Advertisement>) -> BTreeSet<String> {
    ads.into_iter().map(|adv| adv.address.clone()).collect()
}

/// Process-wide radio paired with the one-active-link lease
///
/// Every connection attempt holds the lease until the resulting
/// [`Connection`] is closed or dropped, so at most one peripheral link is
/// open at a time regardless of how many callers share the handle.
#[derive(Clone)]
pub struct RadioHandle {
    radio: Arc<dyn Radio>,
    lease: Arc<Mutex<()>>,
}

impl fmt::Debug for RadioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioHandle")
            .field("radio", &self.radio.name())
            .finish_non_exhaustive()
    }
}

impl RadioHandle {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self {
            radio,
            lease: Arc::new(Mutex::new(())),
        }
    }

    pub async fn scan(&self, timeout: Duration) -> RadioResult<Vec<Advertisement>> {
        let _lease = self.lease.lock().await;
        self.radio.scan(timeout).await
    }

    pub async fn probe(&self, address: &str, timeout: Duration) -> RadioResult<bool> {
        let _lease = self.lease.lock().await;
        self.radio.probe(address, timeout).await
    }

    /// Acquire the lease and connect. The lease stays held by the returned
    /// connection.
    pub async fn connect(&self, address: &str, timeout: Duration) -> RadioResult<Connection> {
        let guard = Arc::clone(&self.lease).lock_owned().await;
        let link = self.radio.connect(address, timeout).await?;
        Ok(Connection {
            link,
            _lease: guard,
        })
    }

    /// Whether some connection currently holds the lease
    pub fn is_busy(&self) -> bool {
        self.lease.try_lock().is_err()
    }
}

/// An open link plus the lease that keeps other links from opening
#[derive(Debug)]
pub struct Connection {
    pub link: Box<dyn Link>,
    _lease: OwnedMutexGuard<()>,
}

impl Connection {
    /// Disconnect and release the lease
    pub async fn close(mut self) -> RadioResult<()> {
        self.link.disconnect().await
    }
}

/// Radio for transports this host has no backend for
#[derive(Debug, Clone)]
pub struct UnsupportedRadio {
    name: String,
}

impl UnsupportedRadio {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Radio for UnsupportedRadio {
    async fn scan(&self, _timeout: Duration) -> RadioResult<Vec<Advertisement>> {
        Err(RadioError::NotImplemented("scan"))
    }

    async fn connect(&self, _address: &str, _timeout: Duration) -> RadioResult<Box<dyn Link>> {
        Err(RadioError::NotImplemented("connect"))
    }

    async fn probe(&self, _address: &str, _timeout: Duration) -> RadioResult<bool> {
        Err(RadioError::NotImplemented("probe"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
