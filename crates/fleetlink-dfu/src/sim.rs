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

//! Simulated radio with legacy-DFU peripherals
//!
//! Nodes answer control-point requests the way an nRF51 bootloader does,
//! switch into bootloader mode on request and install whatever image they
//! are sent. Faults can be injected per node.

use crate::error::RadioError;
use crate::protocol::{
    self, BOOTLOADER_NAME, COMMAND_RESTART, DFU_CONTROL_POINT, DFU_PACKET, IMAGE_TYPE_APPLICATION,
    NODE_CONTROL, OpCode, Status,
};
use crate::radio::{Advertisement, Link, Radio, RadioResult, WriteKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report receipt offsets shifted by this many bytes
    ReceiptSkew(i64),
    /// Never send a notification
    Silent,
    /// Answer this opcode with `OperationFailed`
    Reject(OpCode),
    /// Drop the link after this many data packets
    DropAfterPackets(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    AwaitSize,
    AwaitInitData,
    InitComplete,
    Receiving,
}

#[derive(Debug, Default)]
struct NodeState {
    app_name: String,
    visible: bool,
    in_bootloader: bool,
    phase: Phase,
    expected_size: u32,
    received: Vec<u8>,
    init_data: Vec<u8>,
    installed: Vec<u8>,
    receipt_interval: u16,
    packets_since_receipt: u16,
    data_packets: u32,
    receipts_sent: u32,
    connections: u32,
    mode_switches: u32,
    opcodes: Vec<u8>,
    commands: Vec<u8>,
    faults: Vec<Fault>,
    link_generation: u64,
    notify: Option<mpsc::Sender<Vec<u8>>>,
}

impl NodeState {
    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn skew(&self) -> i64 {
        self.faults
            .iter()
            .find_map(|f| match f {
                Fault::ReceiptSkew(skew) => Some(*skew),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn drop_after(&self) -> Option<u32> {
        self.faults.iter().find_map(|f| match f {
            Fault::DropAfterPackets(n) => Some(*n),
            _ => None,
        })
    }

    fn advertised_name(&self) -> String {
        if self.in_bootloader {
            BOOTLOADER_NAME.to_string()
        } else {
            self.app_name.clone()
        }
    }

    fn notify(&mut self, frame: Vec<u8>) {
        if self.has_fault(Fault::Silent) {
            return;
        }
        if let Some(tx) = &self.notify {
            let _ = tx.try_send(frame);
        }
    }

    fn respond(&mut self, opcode: OpCode) {
        let status = if self.has_fault(Fault::Reject(opcode)) {
            Status::OperationFailed
        } else {
            Status::Success
        };
        self.notify(vec![OpCode::Response as u8, opcode as u8, status as u8]);
    }

    /// Reset the node; any open link is gone afterwards
    fn reset(&mut self) {
        self.link_generation += 1;
        self.notify = None;
    }
}

/// Handle to one simulated peripheral; clones share state
#[derive(Debug, Clone)]
pub struct SimulatedNode {
    address: String,
    state: Arc<Mutex<NodeState>>,
}

impl SimulatedNode {
    pub fn new(address: impl Into<String>, app_name: impl Into<String>) -> Self {
        let state = NodeState {
            app_name: app_name.into(),
            visible: true,
            ..Default::default()
        };
        Self {
            address: address.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    #[must_use]
    pub fn in_bootloader(self) -> Self {
        self.state.lock().in_bootloader = true;
        self
    }

    /// Bootloader already holding the first bytes of an image of `size`
    #[must_use]
    pub fn with_partial_transfer(self, received: &[u8], size: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.in_bootloader = true;
            state.phase = Phase::Receiving;
            state.expected_size = size;
            state.received = received.to_vec();
            state.receipt_interval = protocol::RECEIPT_INTERVAL;
        }
        self
    }

    #[must_use]
    pub fn with_fault(self, fault: Fault) -> Self {
        self.state.lock().faults.push(fault);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }

    pub fn installed(&self) -> Vec<u8> {
        self.state.lock().installed.clone()
    }

    pub fn init_data(&self) -> Vec<u8> {
        self.state.lock().init_data.clone()
    }

    pub fn data_packets(&self) -> u32 {
        self.state.lock().data_packets
    }

    pub fn receipts_sent(&self) -> u32 {
        self.state.lock().receipts_sent
    }

    pub fn connections(&self) -> u32 {
        self.state.lock().connections
    }

    pub fn mode_switches(&self) -> u32 {
        self.state.lock().mode_switches
    }

    pub fn is_in_bootloader(&self) -> bool {
        self.state.lock().in_bootloader
    }

    pub fn commands(&self) -> Vec<u8> {
        self.state.lock().commands.clone()
    }

    pub fn saw_opcode(&self, opcode: OpCode) -> bool {
        self.state.lock().opcodes.contains(&(opcode as u8))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimRadio {
    nodes: Arc<Mutex<BTreeMap<String, SimulatedNode>>>,
    scan_failure: Arc<Mutex<Option<String>>>,
    scans: Arc<Mutex<u32>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: SimulatedNode) {
        self.nodes.lock().insert(node.address.clone(), node);
    }

    /// Make every following scan fail with `message`
    pub fn fail_scans(&self, message: impl Into<String>) {
        *self.scan_failure.lock() = Some(message.into());
    }

    pub fn scans(&self) -> u32 {
        *self.scans.lock()
    }

    fn visible(&self) -> Vec<Advertisement> {
        self.nodes
            .lock()
            .values()
            .filter_map(|node| {
                let state = node.state.lock();
                state.visible.then(|| Advertisement {
                    address: node.address.clone(),
                    local_name: Some(state.advertised_name()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Radio for SimRadio {
    async fn scan(&self, timeout: Duration) -> RadioResult<Vec<Advertisement>> {
        *self.scans.lock() += 1;
        let failure = self.scan_failure.lock().clone();
        if let Some(message) = failure {
            return Err(RadioError::Scan(message));
        }
        tokio::time::sleep(timeout).await;
        Ok(self.visible())
    }

    async fn connect(&self, address: &str, timeout: Duration) -> RadioResult<Box<dyn Link>> {
        let node = self.nodes.lock().get(address).cloned();
        let Some(node) = node.filter(|n| n.state.lock().visible) else {
            tokio::time::sleep(timeout).await;
            return Err(RadioError::NotFound(address.to_string()));
        };

        let (name, generation) = {
            let mut state = node.state.lock();
            state.connections += 1;
            state.link_generation += 1;
            (state.advertised_name(), state.link_generation)
        };

        Ok(Box::new(SimLink {
            node,
            name,
            generation,
        }))
    }

    async fn probe(&self, address: &str, _timeout: Duration) -> RadioResult<bool> {
        Ok(self.visible().iter().any(|adv| adv.address == address))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[derive(Debug)]
struct SimLink {
    node: SimulatedNode,
    name: String,
    generation: u64,
}

impl SimLink {
    fn ensure_connected(&self, state: &NodeState) -> RadioResult<()> {
        if state.link_generation == self.generation {
            Ok(())
        } else {
            Err(RadioError::Disconnected(self.node.address.clone()))
        }
    }

    fn control_write(state: &mut NodeState, data: &[u8]) {
        let Some(&op) = data.first() else { return };
        state.opcodes.push(op);

        if !state.in_bootloader {
            if data == [OpCode::Start as u8, IMAGE_TYPE_APPLICATION] {
                state.in_bootloader = true;
                state.mode_switches += 1;
                state.phase = Phase::Idle;
                state.reset();
            }
            return;
        }

        match OpCode::from_byte(op) {
            Some(OpCode::ReportReceivedSize) => {
                let status = if state.has_fault(Fault::Reject(OpCode::ReportReceivedSize)) {
                    Status::OperationFailed
                } else {
                    Status::Success
                };
                let mut frame = vec![OpCode::Response as u8, op, status as u8];
                let received = i32::try_from(state.received.len()).unwrap_or(i32::MAX);
                frame.extend_from_slice(&received.to_le_bytes());
                state.notify(frame);
            }
            Some(OpCode::Start) => {
                state.phase = Phase::AwaitSize;
                state.received.clear();
            }
            Some(OpCode::Initialise) => match data.get(1) {
                Some(0x00) => {
                    state.phase = Phase::AwaitInitData;
                    state.init_data.clear();
                }
                _ => {
                    state.phase = Phase::InitComplete;
                    state.respond(OpCode::Initialise);
                }
            },
            Some(OpCode::RequestBlockReceipt) => {
                let lo = data.get(1).copied().unwrap_or(0);
                let hi = data.get(2).copied().unwrap_or(0);
                state.receipt_interval = u16::from_le_bytes([lo, hi]);
            }
            Some(OpCode::Receive) => {
                state.phase = Phase::Receiving;
                state.packets_since_receipt = 0;
            }
            Some(OpCode::Validate) => {
                if state.received.len() == state.expected_size as usize {
                    state.respond(OpCode::Validate);
                } else {
                    state.notify(vec![
                        OpCode::Response as u8,
                        OpCode::Validate as u8,
                        Status::CrcError as u8,
                    ]);
                }
            }
            Some(OpCode::Activate) => {
                state.installed = std::mem::take(&mut state.received);
                state.in_bootloader = false;
                state.phase = Phase::Idle;
                state.reset();
            }
            _ => state.notify(vec![
                OpCode::Response as u8,
                op,
                Status::NotSupported as u8,
            ]),
        }
    }

    fn packet_write(state: &mut NodeState, data: &[u8]) {
        match state.phase {
            Phase::AwaitSize => {
                if let Some(size) = data.get(8..12) {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(size);
                    state.expected_size = u32::from_le_bytes(bytes);
                }
                state.respond(OpCode::Start);
            }
            Phase::AwaitInitData => state.init_data.extend_from_slice(data),
            Phase::Receiving => {
                state.received.extend_from_slice(data);
                state.data_packets += 1;
                state.packets_since_receipt += 1;

                if state.receipt_interval > 0
                    && state.packets_since_receipt == state.receipt_interval
                {
                    state.packets_since_receipt = 0;
                    state.receipts_sent += 1;
                    let received = i64::try_from(state.received.len()).unwrap_or(i64::MAX);
                    let reported = u32::try_from(received + state.skew()).unwrap_or(0);
                    let mut frame = vec![OpCode::BlockReceipt as u8];
                    frame.extend_from_slice(&reported.to_le_bytes());
                    state.notify(frame);
                }

                if state.received.len() >= state.expected_size as usize {
                    state.respond(OpCode::Receive);
                }

                if state.drop_after() == Some(state.data_packets) {
                    state.reset();
                }
            }
            Phase::Idle | Phase::InitComplete => {}
        }
    }
}

#[async_trait]
impl Link for SimLink {
    fn address(&self) -> &str {
        &self.node.address
    }

    fn local_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn request_mtu(&mut self, _mtu: u16) -> RadioResult<()> {
        let state = self.node.state.lock();
        self.ensure_connected(&state)
    }

    async fn subscribe(&mut self, characteristic: Uuid) -> RadioResult<mpsc::Receiver<Vec<u8>>> {
        let mut state = self.node.state.lock();
        self.ensure_connected(&state)?;
        if characteristic != DFU_CONTROL_POINT {
            return Err(RadioError::MissingCharacteristic(characteristic));
        }
        let (tx, rx) = mpsc::channel(256);
        state.notify = Some(tx);
        Ok(rx)
    }

    async fn write(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
        _kind: WriteKind,
    ) -> RadioResult<()> {
        let mut state = self.node.state.lock();
        self.ensure_connected(&state)?;

        if characteristic == DFU_CONTROL_POINT {
            Self::control_write(&mut state, data);
        } else if characteristic == DFU_PACKET {
            Self::packet_write(&mut state, data);
        } else if characteristic == NODE_CONTROL {
            if let Some(&command) = data.first() {
                state.commands.push(command);
                if command == COMMAND_RESTART {
                    state.reset();
                }
            }
        } else {
            return Err(RadioError::MissingCharacteristic(characteristic));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> RadioResult<()> {
        let mut state = self.node.state.lock();
        if state.link_generation == self.generation {
            state.reset();
        }
        Ok(())
    }
}
