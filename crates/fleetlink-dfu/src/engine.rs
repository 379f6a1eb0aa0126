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

//! Transfer protocol engine
//!
//! Moves a [`FirmwareImage`] onto a peripheral that is already running its
//! bootloader. The engine never retries: the first unexpected frame, timeout
//! or transport failure ends the attempt.

use crate::error::{DfuError, Result};
use crate::firmware::FirmwareImage;
use crate::protocol::{
    self, DFU_CONTROL_POINT, DFU_PACKET, IMAGE_TYPE_APPLICATION, InitPhase, OpCode,
};
use crate::radio::{Link, WriteKind};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Timing and framing knobs shared by the engine and the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuSettings {
    /// Upper bound on every notification wait
    pub notification_timeout: Duration,
    /// How long discovery may take before a connect attempt fails
    pub discovery_timeout: Duration,
    /// Pause after requesting bootloader mode, before rescanning
    pub mode_switch_delay: Duration,
    pub packet_size: usize,
    pub receipt_interval: u16,
}

impl Default for DfuSettings {
    fn default() -> Self {
        Self {
            notification_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            mode_switch_delay: Duration::from_secs(1),
            packet_size: protocol::PACKET_SIZE,
            receipt_interval: protocol::RECEIPT_INTERVAL,
        }
    }
}

pub struct DfuEngine<'a> {
    link: &'a mut dyn Link,
    notifications: mpsc::Receiver<Vec<u8>>,
    settings: DfuSettings,
}

impl std::fmt::Debug for DfuEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DfuEngine")
            .field("address", &self.link.address())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a> DfuEngine<'a> {
    /// Subscribe to the control point of a bootloader-mode link
    pub async fn attach(link: &'a mut dyn Link, settings: DfuSettings) -> Result<Self> {
        let notifications = link.subscribe(DFU_CONTROL_POINT).await?;
        Ok(Self {
            link,
            notifications,
            settings,
        })
    }

    /// Full update: check, initialise (fresh transfers only), transfer,
    /// validate, activate
    pub async fn run(&mut self, image: &mut FirmwareImage) -> Result<()> {
        self.check_state(image).await?;

        if image.current_block == 0 {
            self.initialise(image).await?;
        } else {
            info!(
                device = %self.link.address(),
                offset = image.current_block,
                "Resuming interrupted transfer"
            );
        }

        self.transfer(image).await?;
        self.validate(image).await?;
        self.finalise().await
    }

    /// Ask the peripheral how many image bytes it already holds and record
    /// that as the resume offset
    pub async fn check_state(&mut self, image: &mut FirmwareImage) -> Result<u32> {
        self.control(&[OpCode::ReportReceivedSize as u8]).await?;
        let payload = self.wait_for(OpCode::ReportReceivedSize).await?;
        let offset = protocol::parse_received_size(&payload)?;

        if offset > image.size {
            return Err(DfuError::SizeMismatch {
                expected: image.size,
                reported: offset,
            });
        }

        debug!(device = %self.link.address(), offset, "Peripheral reported received size");
        image.current_block = offset;
        Ok(offset)
    }

    pub async fn initialise(&mut self, image: &FirmwareImage) -> Result<()> {
        debug!(device = %self.link.address(), size = image.size, "Starting DFU");
        self.control(&[OpCode::Start as u8, IMAGE_TYPE_APPLICATION]).await?;
        self.data(&protocol::image_size_packet(image.size)).await?;
        self.wait_for(OpCode::Start).await?;

        self.control(&[OpCode::Initialise as u8, InitPhase::Begin as u8])
            .await?;
        for chunk in image.init_data.chunks(self.settings.packet_size) {
            self.data(chunk).await?;
        }
        self.control(&[OpCode::Initialise as u8, InitPhase::End as u8])
            .await?;
        self.wait_for(OpCode::Initialise).await?;

        self.control(&protocol::receipt_interval_request(
            self.settings.receipt_interval,
        ))
        .await?;
        self.control(&[OpCode::Receive as u8]).await
    }

    /// Stream the image from `image.current_block` onwards
    pub async fn transfer(&mut self, image: &mut FirmwareImage) -> Result<()> {
        let packet_size = self.settings.packet_size;
        let interval = u32::from(self.settings.receipt_interval);
        let size = image.size as usize;
        let mut sent = image.current_block as usize;
        let mut packets: u32 = 0;

        while sent < size {
            let end = (sent + packet_size).min(size);
            self.data(&image.binary[sent..end]).await?;
            sent = end;
            packets += 1;

            if interval > 0 && packets % interval == 0 {
                let expected = u32::try_from(sent).unwrap_or(u32::MAX);
                let frame = self.next_notification().await?;
                let reported = protocol::parse_block_receipt(&frame)?;
                if reported != expected {
                    return Err(DfuError::OutOfSync { expected, reported });
                }
                image.current_block = reported;
                info!(
                    device = %self.link.address(),
                    progress = format!("{:.1}%", image.progress_percent()),
                    "Firmware transfer progress"
                );
            }
        }

        self.wait_for(OpCode::Receive).await?;
        image.current_block = image.size;
        info!(device = %self.link.address(), "Firmware transfer complete");
        Ok(())
    }

    pub async fn validate(&mut self, image: &mut FirmwareImage) -> Result<()> {
        let reported = self.check_state(image).await?;
        if reported != image.size {
            return Err(DfuError::SizeMismatch {
                expected: image.size,
                reported,
            });
        }

        self.control(&[OpCode::Validate as u8]).await?;
        self.wait_for(OpCode::Validate).await?;
        Ok(())
    }

    /// Activate the new image. The peripheral resets straight away, so a
    /// transport error on this write is expected and ignored.
    pub async fn finalise(&mut self) -> Result<()> {
        if let Err(e) = self.control(&[OpCode::Activate as u8]).await {
            debug!(device = %self.link.address(), "Activate write ended the link: {e}");
        }
        info!(device = %self.link.address(), "Firmware activated");
        Ok(())
    }

    async fn control(&mut self, request: &[u8]) -> Result<()> {
        self.link
            .write(DFU_CONTROL_POINT, request, WriteKind::WithResponse)
            .await?;
        Ok(())
    }

    async fn data(&mut self, bytes: &[u8]) -> Result<()> {
        self.link
            .write(DFU_PACKET, bytes, WriteKind::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Vec<u8>> {
        let timeout = self.settings.notification_timeout;
        match tokio::time::timeout(timeout, self.notifications.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(DfuError::NotificationsClosed),
            Err(_) => {
                warn!(device = %self.link.address(), "Timed out waiting for notification");
                Err(DfuError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Wait for `[Response, opcode, Success]` and return whatever follows it
    async fn wait_for(&mut self, opcode: OpCode) -> Result<Vec<u8>> {
        let expected = protocol::success_response(opcode);
        let frame = self.next_notification().await?;
        if frame.len() < expected.len() || frame[..expected.len()] != expected {
            return Err(DfuError::IncorrectNotification {
                expected: expected.to_vec(),
                actual: frame,
            });
        }
        Ok(frame[expected.len()..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::Radio;
    use crate::sim::{Fault, SimRadio, SimulatedNode};

    fn image(len: usize) -> FirmwareImage {
        let binary: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        FirmwareImage::new(binary, vec![0x5a; 14]).unwrap()
    }

    async fn bootloader_link(node: &SimulatedNode) -> Box<dyn Link> {
        let radio = SimRadio::new();
        radio.add_node(node.clone());
        radio
            .connect(node.address(), Duration::from_secs(10))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_image_needs_no_receipt_wait() {
        let node = SimulatedNode::new("aa:01", "app").in_bootloader();
        let mut link = bootloader_link(&node).await;
        let mut image = image(1000);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        engine.run(&mut image).await.unwrap();

        assert_eq!(image.current_block, 1000);
        assert_eq!(node.data_packets(), 50);
        assert_eq!(node.receipts_sent(), 0);
        assert_eq!(node.installed(), image.binary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_windows_are_checked() {
        let node = SimulatedNode::new("aa:01", "app").in_bootloader();
        let mut link = bootloader_link(&node).await;
        let mut image = image(4500);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        engine.run(&mut image).await.unwrap();

        // 225 packets: receipts after packets 100 and 200
        assert_eq!(node.data_packets(), 225);
        assert_eq!(node.receipts_sent(), 2);
        assert!(image.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_packet_count_rounds_up_partial_packets() {
        // (image length, data packets, receipt windows)
        for (len, packets, receipts) in [(1, 1, 0), (1001, 51, 0), (2000, 100, 1), (2001, 101, 1)] {
            let node = SimulatedNode::new("aa:01", "app").in_bootloader();
            let mut link = bootloader_link(&node).await;
            let mut image = image(len);

            let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
                .await
                .unwrap();
            engine.run(&mut image).await.unwrap();

            assert_eq!(node.data_packets(), packets, "len {len}");
            assert_eq!(node.receipts_sent(), receipts, "len {len}");
            assert_eq!(image.current_block, image.size, "len {len}");
            assert_eq!(node.installed(), image.binary, "len {len}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_with_partial_last_packet() {
        let mut image = image(2013);
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_partial_transfer(&image.binary[..400], image.size);
        let mut link = bootloader_link(&node).await;

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        engine.run(&mut image).await.unwrap();

        // ceil((2013 - 400) / 20)
        assert_eq!(node.data_packets(), 81);
        assert_eq!(node.receipts_sent(), 0);
        assert_eq!(image.current_block, 2013);
        assert_eq!(node.installed(), image.binary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_initialise() {
        let mut image = image(3000);
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_partial_transfer(&image.binary[..400], image.size);
        let mut link = bootloader_link(&node).await;

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        engine.run(&mut image).await.unwrap();

        assert!(!node.saw_opcode(OpCode::Start));
        assert!(!node.saw_opcode(OpCode::Initialise));
        // (3000 - 400) / 20 packets, one receipt window at offset 2400
        assert_eq!(node.data_packets(), 130);
        assert_eq!(node.receipts_sent(), 1);
        assert_eq!(node.installed(), image.binary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_transfer_runs_initialise() {
        let node = SimulatedNode::new("aa:01", "app").in_bootloader();
        let mut link = bootloader_link(&node).await;
        let mut image = image(100);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        assert_eq!(engine.check_state(&mut image).await.unwrap(), 0);
        engine.run(&mut image).await.unwrap();

        assert!(node.saw_opcode(OpCode::Start));
        assert!(node.saw_opcode(OpCode::Initialise));
        assert!(node.saw_opcode(OpCode::RequestBlockReceipt));
        assert_eq!(node.init_data(), image.init_data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_ahead_is_out_of_sync() {
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_fault(Fault::ReceiptSkew(20));
        let mut link = bootloader_link(&node).await;
        let mut image = image(4000);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        let err = engine.run(&mut image).await.unwrap_err();

        assert!(matches!(
            err,
            DfuError::OutOfSync {
                expected: 2000,
                reported: 2020
            }
        ));
        assert_eq!(node.data_packets(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_behind_is_out_of_sync() {
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_fault(Fault::ReceiptSkew(-20));
        let mut link = bootloader_link(&node).await;
        let mut image = image(4000);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        let err = engine.run(&mut image).await.unwrap_err();
        assert!(matches!(
            err,
            DfuError::OutOfSync {
                expected: 2000,
                reported: 1980
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peripheral_times_out_after_exactly_the_timeout() {
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_fault(Fault::Silent);
        let mut link = bootloader_link(&node).await;
        let mut image = image(100);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        let started = tokio::time::Instant::now();
        let err = engine.check_state(&mut image).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_opcode_is_incorrect_notification() {
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_fault(Fault::Reject(OpCode::Initialise));
        let mut link = bootloader_link(&node).await;
        let mut image = image(100);

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        let err = engine.run(&mut image).await.unwrap_err();

        match err {
            DfuError::IncorrectNotification { expected, actual } => {
                assert_eq!(expected, vec![0x10, 0x02, 0x01]);
                assert_eq!(actual[..2], [0x10, 0x02]);
                assert_ne!(actual[2], 0x01);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_requires_full_image() {
        let mut image = image(1000);
        let node = SimulatedNode::new("aa:01", "app")
            .in_bootloader()
            .with_partial_transfer(&image.binary[..600], image.size);
        let mut link = bootloader_link(&node).await;

        let mut engine = DfuEngine::attach(link.as_mut(), DfuSettings::default())
            .await
            .unwrap();
        let err = engine.validate(&mut image).await.unwrap_err();
        assert!(matches!(
            err,
            DfuError::SizeMismatch {
                expected: 1000,
                reported: 600
            }
        ));
    }
}
