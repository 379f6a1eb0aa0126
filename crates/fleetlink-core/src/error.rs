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

use crate::types::MicroType;
use fleetlink_dfu::{DfuError, RadioError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Provisioning failed for {address}: {message}")]
    Provisioning { address: String, message: String },

    #[error("Fleet API error: {0}")]
    Api(String),

    #[error("Firmware {commit} unavailable: {message}")]
    Firmware { commit: String, message: String },

    #[error("Update of {device} failed: {source}")]
    Update {
        device: String,
        #[source]
        source: DfuError,
    },

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("{capability} is not implemented for {family}")]
    NotImplemented {
        capability: &'static str,
        family: MicroType,
    },

    #[error("Unknown application: {0}")]
    UnknownApplication(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

impl FleetError {
    pub fn store(message: impl std::fmt::Display) -> Self {
        Self::Store(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
