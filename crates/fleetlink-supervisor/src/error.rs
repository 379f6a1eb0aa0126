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

//! Error types for the supervisor crate

use fleetlink_core::FleetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication with the fleet API failed")]
    AuthenticationFailed,

    #[error("fleet API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Fleet(#[from] FleetError),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
