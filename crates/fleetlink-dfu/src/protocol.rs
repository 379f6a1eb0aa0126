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

//! Legacy Nordic DFU wire format
//!
//! Requests are written to the control point; image bytes go to the packet
//! characteristic. The peripheral answers on the control point with
//! `[Response, opcode, status, ..]` frames and, during the data phase, with
//! `[PacketReceipt, offset(le u32)]` frames.

use crate::error::{DfuError, Result};
use uuid::Uuid;

/// DFU service exposed by both the application and the bootloader
pub const DFU_SERVICE: Uuid = Uuid::from_u128(0x00001530_1212_efde_1523_785feabcd123);
/// Control point: requests in, notifications out
pub const DFU_CONTROL_POINT: Uuid = Uuid::from_u128(0x00001531_1212_efde_1523_785feabcd123);
/// Packet characteristic: image size, init data and firmware bytes
pub const DFU_PACKET: Uuid = Uuid::from_u128(0x00001532_1212_efde_1523_785feabcd123);
/// Node control characteristic used by restart and identify
pub const NODE_CONTROL: Uuid = Uuid::from_u128(0x0000fe01_1212_efde_1523_785feabcd123);

/// Advertised name of a node running its bootloader
pub const BOOTLOADER_NAME: &str = "DfuTarg";

/// Bytes carried by one data packet
pub const PACKET_SIZE: usize = 20;
/// Packets between two receipt notifications
pub const RECEIPT_INTERVAL: u16 = 100;
/// ATT MTU requested right after connecting
pub const PREFERRED_MTU: u16 = 247;

/// Image type tag for an application-only update
pub const IMAGE_TYPE_APPLICATION: u8 = 0x04;

/// Node control commands
pub const COMMAND_RESTART: u8 = 0x01;
pub const COMMAND_IDENTIFY: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Start = 0x01,
    Initialise = 0x02,
    Receive = 0x03,
    Validate = 0x04,
    Activate = 0x05,
    Reset = 0x06,
    ReportReceivedSize = 0x07,
    RequestBlockReceipt = 0x08,
    Response = 0x10,
    BlockReceipt = 0x11,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Start),
            0x02 => Some(Self::Initialise),
            0x03 => Some(Self::Receive),
            0x04 => Some(Self::Validate),
            0x05 => Some(Self::Activate),
            0x06 => Some(Self::Reset),
            0x07 => Some(Self::ReportReceivedSize),
            0x08 => Some(Self::RequestBlockReceipt),
            0x10 => Some(Self::Response),
            0x11 => Some(Self::BlockReceipt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x01,
    InvalidState = 0x02,
    NotSupported = 0x03,
    DataSizeExceedsLimit = 0x04,
    CrcError = 0x05,
    OperationFailed = 0x06,
}

/// Second byte of an `Initialise` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitPhase {
    Begin = 0x00,
    End = 0x01,
}

/// The three leading bytes of a successful response to `opcode`
pub fn success_response(opcode: OpCode) -> [u8; 3] {
    [OpCode::Response as u8, opcode as u8, Status::Success as u8]
}

/// Payload of the `Start` data write: softdevice and bootloader sizes are
/// zero, followed by the application size.
pub fn image_size_packet(size: u32) -> [u8; 12] {
    let mut packet = [0u8; 12];
    packet[8..].copy_from_slice(&size.to_le_bytes());
    packet
}

pub fn receipt_interval_request(packets: u16) -> [u8; 3] {
    let [lo, hi] = packets.to_le_bytes();
    [OpCode::RequestBlockReceipt as u8, lo, hi]
}

/// Read the received-size reported after a `ReportReceivedSize` response
pub fn parse_received_size(payload: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            DfuError::MalformedNotification(format!(
                "received-size payload too short: {payload:02x?}"
            ))
        })?;
    let offset = i32::from_le_bytes(bytes);
    u32::try_from(offset).map_err(|_| {
        DfuError::MalformedNotification(format!("negative received size {offset}"))
    })
}

/// Read the cumulative offset from a `[BlockReceipt, offset..]` frame
pub fn parse_block_receipt(frame: &[u8]) -> Result<u32> {
    match frame {
        [op, a, b, c, d, ..] if *op == OpCode::BlockReceipt as u8 => {
            Ok(u32::from_le_bytes([*a, *b, *c, *d]))
        }
        _ => Err(DfuError::IncorrectNotification {
            expected: vec![OpCode::BlockReceipt as u8],
            actual: frame.to_vec(),
        }),
    }
}
