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

mod common;

use common::{DirFirmware, Harness, ProbeFailingRadio};
use fleetlink_core::{
    ApplicationRecord, DeviceRecord, DeviceStatus, FleetError, MicroType, RadioType,
};
use fleetlink_dfu::DfuError;
use fleetlink_dfu::protocol::{COMMAND_IDENTIFY, COMMAND_RESTART};
use fleetlink_dfu::sim::{Fault, SimRadio, SimulatedNode};
use std::sync::Arc;

const APP: &str = "weather";

fn declared_app(target: Option<&str>) -> ApplicationRecord {
    let mut app = ApplicationRecord::new(APP, "Weather stations")
        .with_type(MicroType::Nrf51822, RadioType::Bluetooth);
    app.target_commit = target.map(str::to_string);
    app
}

fn known_device(address: &str, remote_id: &str, commit: Option<&str>) -> DeviceRecord {
    let mut device = DeviceRecord::new(address, remote_id, APP, MicroType::Nrf51822);
    device.commit = commit.map(str::to_string);
    device
}

#[tokio::test(start_paused = true)]
async fn test_application_without_type_is_skipped() {
    let radio = SimRadio::new();
    radio.add_node(SimulatedNode::new("aa:01", APP));
    let h = Harness::with_sim(&radio);
    h.store
        .insert_application(ApplicationRecord::new(APP, "Weather stations"));

    let report = h.fleet.run_pass(APP).await.unwrap();

    assert!(report.skipped);
    assert_eq!(radio.scans(), 0);
    assert_eq!(h.provisioner.calls(), 0);
    assert_eq!(h.store.device_saves(), 0);
    assert_eq!(h.store.application_saves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_visible_device_provisioned_once_across_passes() {
    let radio = SimRadio::new();
    radio.add_node(SimulatedNode::new("aa:01", APP));
    radio.add_node(SimulatedNode::new("bb:01", "someone-else"));
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(None));

    let first = h.fleet.run_pass(APP).await.unwrap();
    let second = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(first.provisioned, vec!["aa:01"]);
    assert!(second.provisioned.is_empty());
    assert_eq!(h.provisioner.calls(), 1);

    let devices = h.store.devices(APP);
    assert_eq!(devices.len(), 1);
    let device = &devices["aa:01"];
    assert_eq!(device.remote_id, "remote-1");
    assert_eq!(device.micro, MicroType::Nrf51822);
    assert_eq!(device.status, DeviceStatus::Online);
    assert!(device.last_seen.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_outdated_online_device_is_updated() {
    let radio = SimRadio::new();
    let node = SimulatedNode::new("aa:01", APP);
    radio.add_node(node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(Some("c0ffee")));
    h.store
        .insert_device(known_device("aa:01", "remote-7", Some("deadbeef")));

    let report = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(report.updated, vec!["aa:01"]);
    assert_eq!(node.installed(), DirFirmware::image_for("c0ffee"));
    assert_eq!(node.mode_switches(), 1);
    assert_eq!(
        h.store.device(APP, "aa:01").commit.as_deref(),
        Some("c0ffee")
    );

    let app = h.store.application(APP);
    assert_eq!(app.commit.as_deref(), Some("c0ffee"));
    assert!(app.firmware_dir.is_some());
    assert_eq!(h.firmware.fetches(), vec!["c0ffee"]);

    let logs = h.reporter.logs_for("remote-7");
    assert_eq!(logs.first().map(String::as_str), Some("Updating firmware to c0ffee"));
    assert_eq!(logs.last().map(String::as_str), Some("Firmware c0ffee installed"));
}

#[tokio::test(start_paused = true)]
async fn test_device_on_target_commit_is_never_updated() {
    let radio = SimRadio::new();
    let node = SimulatedNode::new("aa:01", APP);
    radio.add_node(node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(Some("c0ffee")));
    h.store
        .insert_device(known_device("aa:01", "remote-1", Some("c0ffee")));

    let report = h.fleet.run_pass(APP).await.unwrap();

    assert!(report.updated.is_empty());
    assert_eq!(report.online, 1);
    assert_eq!(node.connections(), 0);
    assert!(h.reporter.logs_for("remote-1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invisible_device_defaults_offline_and_is_not_updated() {
    let radio = SimRadio::new();
    let node = SimulatedNode::new("aa:01", APP);
    node.set_visible(false);
    radio.add_node(node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(Some("c0ffee")));
    let mut device = known_device("aa:01", "remote-1", Some("old"));
    device.status = DeviceStatus::Online;
    h.store.insert_device(device);

    let report = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(report.online, 0);
    assert!(report.updated.is_empty());
    let stored = h.store.device(APP, "aa:01");
    assert_eq!(stored.status, DeviceStatus::Offline);
    assert!(stored.last_seen.is_none());
    assert_eq!(node.connections(), 0);
    assert_eq!(
        h.reporter.statuses.lock().as_slice(),
        &[("remote-1".to_string(), DeviceStatus::Offline, Some("old".to_string()))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_probe_error_aborts_pass_without_saving() {
    let radio = SimRadio::new();
    radio.add_node(SimulatedNode::new("aa:01", APP));
    let h = Harness::new(Arc::new(ProbeFailingRadio(radio)));
    h.store.insert_application(declared_app(None));
    h.store.insert_device(known_device("aa:01", "remote-1", None));

    let err = h.fleet.run_pass(APP).await.unwrap_err();

    assert!(matches!(err, FleetError::Radio(_)));
    assert_eq!(h.store.device_saves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scan_failure_aborts_pass() {
    let radio = SimRadio::new();
    radio.fail_scans("adapter busy");
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(None));

    let err = h.fleet.run_pass(APP).await.unwrap_err();

    assert!(matches!(err, FleetError::Radio(_)));
    assert_eq!(h.provisioner.calls(), 0);
    assert_eq!(h.store.device_saves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_failure_does_not_block_other_devices() {
    let radio = SimRadio::new();
    radio.add_node(SimulatedNode::new("aa:01", APP));
    radio.add_node(SimulatedNode::new("aa:02", APP));
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(None));
    h.provisioner.fail_next(1);

    let report = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(report.provisioned, vec!["aa:02"]);
    assert_eq!(report.provisioning_errors.len(), 1);
    assert!(matches!(
        &report.provisioning_errors[0],
        FleetError::Provisioning { address, .. } if address == "aa:01"
    ));
    assert_eq!(h.store.devices(APP).len(), 1);
    assert_eq!(h.store.device_saves(), 1);

    // The failed address is retried on the next pass
    let report = h.fleet.run_pass(APP).await.unwrap();
    assert_eq!(report.provisioned, vec!["aa:01"]);
    assert_eq!(h.store.devices(APP).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_update_aborts_pass_before_save() {
    let radio = SimRadio::new();
    let node = SimulatedNode::new("aa:01", APP).with_fault(Fault::Reject(
        fleetlink_dfu::protocol::OpCode::Initialise,
    ));
    radio.add_node(node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(Some("c0ffee")));
    h.store.insert_device(known_device("aa:01", "remote-1", None));

    let err = h.fleet.run_pass(APP).await.unwrap_err();

    assert!(matches!(
        err,
        FleetError::Update {
            source: DfuError::IncorrectNotification { .. },
            ..
        }
    ));
    assert_eq!(h.store.device_saves(), 0);
    assert!(node.installed().is_empty());
    let logs = h.reporter.logs_for("remote-1");
    assert!(logs.last().unwrap().starts_with("Firmware update failed"));
}

#[tokio::test(start_paused = true)]
async fn test_pinned_commit_overrides_application_target() {
    let radio = SimRadio::new();
    let pinned_node = SimulatedNode::new("aa:01", APP);
    let plain_node = SimulatedNode::new("aa:02", APP);
    radio.add_node(pinned_node.clone());
    radio.add_node(plain_node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(Some("c0ffee")));
    let mut pinned = known_device("aa:01", "remote-1", Some("c0ffee"));
    pinned.target_commit = Some("beta42".to_string());
    h.store.insert_device(pinned);
    h.store.insert_device(known_device("aa:02", "remote-2", None));

    let report = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(report.updated, vec!["aa:01", "aa:02"]);
    assert_eq!(pinned_node.installed(), DirFirmware::image_for("beta42"));
    assert_eq!(plain_node.installed(), DirFirmware::image_for("c0ffee"));
    assert_eq!(h.firmware.fetches(), vec!["c0ffee", "beta42"]);
}

#[tokio::test(start_paused = true)]
async fn test_extracted_firmware_is_not_fetched_again() {
    let radio = SimRadio::new();
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(Some("c0ffee")));

    h.fleet.run_pass(APP).await.unwrap();
    h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(h.firmware.fetches(), vec!["c0ffee"]);
    assert_eq!(h.store.application_saves(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_commands_run_for_online_devices() {
    let radio = SimRadio::new();
    let node = SimulatedNode::new("aa:01", APP);
    radio.add_node(node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(None));
    h.store.insert_device(known_device("aa:01", "remote-1", None));

    h.fleet.request_restart("remote-1").await.unwrap();
    h.fleet.request_identify("remote-1").await.unwrap();
    let report = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(report.commands, 2);
    assert_eq!(node.commands(), vec![COMMAND_IDENTIFY, COMMAND_RESTART]);
    let stored = h.store.device(APP, "aa:01");
    assert!(!stored.restart_pending);
    assert!(!stored.identify_pending);
}

#[tokio::test(start_paused = true)]
async fn test_pending_commands_wait_while_offline() {
    let radio = SimRadio::new();
    let node = SimulatedNode::new("aa:01", APP);
    node.set_visible(false);
    radio.add_node(node.clone());
    let h = Harness::with_sim(&radio);
    h.store.insert_application(declared_app(None));
    h.store.insert_device(known_device("aa:01", "remote-1", None));

    h.fleet.request_restart("remote-1").await.unwrap();
    let report = h.fleet.run_pass(APP).await.unwrap();

    assert_eq!(report.commands, 0);
    assert!(node.commands().is_empty());
    assert!(h.store.device(APP, "aa:01").restart_pending);
}
