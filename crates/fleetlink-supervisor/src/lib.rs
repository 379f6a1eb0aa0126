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

//! FleetLink Supervisor - configuration, persistence and the HTTP side of
//! the fleet
//!
//! Provides the JSON-file record store, the fleet API client used for
//! provisioning and status reporting, checksum-verified firmware
//! distribution and the periodic runtime that drives `fleetlink-core`.

pub mod api;
pub mod config;
pub mod error;
pub mod firmware;
pub mod runtime;
pub mod store;

pub use api::FleetApiClient;
pub use config::{ApplicationConfig, SupervisorConfig};
pub use error::{Result, SupervisorError};
pub use firmware::HttpFirmwareSource;
pub use runtime::Runtime;
pub use store::JsonFileStore;
