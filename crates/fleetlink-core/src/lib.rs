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

//! FleetLink core - device records and the per-application fleet pass
//!
//! The [`Fleet`] context owns the collaborators (store, provisioning,
//! firmware distribution, status reporting) and the shared radio. A pass
//! reconciles one application's device set against what the radio can see
//! and triggers firmware updates through the [`Board`] abstraction.

pub mod board;
pub mod error;
pub mod fleet;
pub mod pass;
pub mod services;
pub mod types;

pub use board::Board;
pub use error::{FleetError, Result};
pub use fleet::{Collaborators, Fleet, FleetSettings};
pub use pass::PassReport;
pub use services::{DeviceStore, FirmwareSource, Provisioner, StatusReporter};
pub use types::{ApplicationRecord, DeviceRecord, DeviceSet, DeviceStatus, MicroType, RadioType};
