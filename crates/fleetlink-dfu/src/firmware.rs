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

//! Firmware image held in memory for one update attempt

use crate::error::{DfuError, Result};
use std::path::Path;

pub const BINARY_FILE: &str = "application.bin";
pub const INIT_DATA_FILE: &str = "application.dat";

#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Executable image
    pub binary: Vec<u8>,
    /// Init packet consumed by the bootloader (CRC, versions)
    pub init_data: Vec<u8>,
    /// Length of `binary`
    pub size: u32,
    /// Bytes the peripheral has acknowledged so far
    pub current_block: u32,
}

impl FirmwareImage {
    pub fn new(binary: Vec<u8>, init_data: Vec<u8>) -> Result<Self> {
        let size = u32::try_from(binary.len())
            .map_err(|_| DfuError::Firmware(format!("image too large: {} bytes", binary.len())))?;
        if size == 0 {
            return Err(DfuError::Firmware("image is empty".to_string()));
        }
        Ok(Self {
            binary,
            init_data,
            size,
            current_block: 0,
        })
    }

    /// Read `application.bin` and `application.dat` from an extracted
    /// firmware directory
    pub async fn load(dir: &Path) -> Result<Self> {
        let binary = tokio::fs::read(dir.join(BINARY_FILE)).await?;
        let init_data = tokio::fs::read(dir.join(INIT_DATA_FILE)).await?;
        tracing::debug!(
            "Loaded firmware from {} ({} bytes, {} bytes init data)",
            dir.display(),
            binary.len(),
            init_data.len()
        );
        Self::new(binary, init_data)
    }

    /// Acknowledged share of the image, 0-100
    pub fn progress_percent(&self) -> f32 {
        #[expect(clippy::cast_precision_loss, reason = "image sizes are far below f32 precision limits")]
        let ratio = self.current_block as f32 / self.size as f32;
        ratio * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.current_block == self.size
    }
}
