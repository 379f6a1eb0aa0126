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

//! Error types for the DFU crate

use thiserror::Error;

/// Failures raised by a radio backend or an open link
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("peripheral {0} not found")]
    NotFound(String),

    #[error("link to {0} is not connected")]
    Disconnected(String),

    #[error("characteristic {0} not available")]
    MissingCharacteristic(uuid::Uuid),

    #[error("write failed: {0}")]
    Write(String),

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("{0} is not implemented for this radio")]
    NotImplemented(&'static str),

    #[error("radio backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum DfuError {
    #[error("transport error: {0}")]
    Transport(#[from] RadioError),

    #[error("timed out waiting for notification after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("incorrect notification received: expected {expected:02x?}, got {actual:02x?}")]
    IncorrectNotification { expected: Vec<u8>, actual: Vec<u8> },

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    #[error("transfer out of sync: expected offset {expected}, peripheral reported {reported}")]
    OutOfSync { expected: u32, reported: u32 },

    #[error("image size mismatch: expected {expected} bytes, peripheral reported {reported}")]
    SizeMismatch { expected: u32, reported: u32 },

    #[error("notification channel closed")]
    NotificationsClosed,

    #[error("firmware image error: {0}")]
    Firmware(String),

    #[error("firmware image I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("update aborted: {0}")]
    Aborted(String),
}

impl DfuError {
    /// Whether this failure came from the 10-second notification wait
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, DfuError>;
