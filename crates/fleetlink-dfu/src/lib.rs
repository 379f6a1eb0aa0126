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

//! FleetLink DFU - over-the-air firmware updates for BLE nodes
//!
//! This crate drives the legacy Nordic DFU protocol against a single
//! peripheral at a time.
//!
//! ## Layers
//!
//! - **radio**: `Radio`/`Link` transport traits plus the single-link lease
//! - **protocol**: opcodes, status codes, GATT identifiers and frame helpers
//! - **engine**: check / initialise / transfer / validate / activate
//! - **session**: connection lifecycle including the bootloader-mode detour
//!
//! With the `btleplug` feature a host Bluetooth adapter backend is available
//! under `radio::btle`. The `sim` feature exposes simulated peripherals.

pub mod engine;
pub mod error;
pub mod firmware;
pub mod protocol;
pub mod radio;
pub mod session;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use engine::{DfuEngine, DfuSettings};
pub use error::{DfuError, RadioError, Result};
pub use firmware::FirmwareImage;
pub use radio::{Advertisement, Connection, Link, Radio, RadioHandle, WriteKind};
pub use session::DfuSession;
