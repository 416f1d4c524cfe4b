//! End-to-end transport behavior against a scripted peripheral
//!
//! Covers the connection lifecycle (discovery, descriptor walk, version
//! negotiation), the request/response engine contract (gate balance,
//! exactly-once completion, write-before-read ordering) and the legacy
//! firmware paths.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio::time::timeout;
use uuid::Uuid;

use provlink_ble::testing::{RecordedOp, Responder, SimulatedPeripheral, SimulatedPeripheralBuilder};
use provlink_ble::{
    link_event_channel, BleTransport, BleTransportConfig, TransportError, TransportEvent,
};
use provlink_core::endpoints::{LEGACY_CONFIG_UUID, LEGACY_SERVICE_UUID, LEGACY_SESSION_UUID};

// ----------------------------------------------------------------------------
// Test Fixtures
// ----------------------------------------------------------------------------

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE: Uuid = Uuid::from_u128(0x021a9004_0382_4aea_bff4_6b3f1c5adfb4);
const SESSION_CHAR: Uuid = Uuid::from_u128(0x021a9005_0382_4aea_bff4_6b3f1c5adfb4);
const CONFIG_CHAR: Uuid = Uuid::from_u128(0x021a9006_0382_4aea_bff4_6b3f1c5adfb4);
const SCAN_CHAR: Uuid = Uuid::from_u128(0x021a9007_0382_4aea_bff4_6b3f1c5adfb4);
const VER_CHAR: Uuid = Uuid::from_u128(0x021a9008_0382_4aea_bff4_6b3f1c5adfb4);
const ECHO_CHAR: Uuid = Uuid::from_u128(0x021a9009_0382_4aea_bff4_6b3f1c5adfb4);

const VERSION_JSON: &[u8] = br#"{"prov":{"ver":"v1.1","cap":["wifi_scan","no_pop"]}}"#;

/// Fully provisioned firmware: every endpoint announced, JSON version reply
fn scripted_device() -> SimulatedPeripheralBuilder {
    SimulatedPeripheral::builder(SERVICE)
        .endpoint(SESSION_CHAR, "prov-session")
        .endpoint(CONFIG_CHAR, "prov-config")
        .endpoint(SCAN_CHAR, "prov-scan")
        .endpoint(VER_CHAR, "proto-ver")
        .responder(VER_CHAR, Responder::Fixed(VERSION_JSON.to_vec()))
        .endpoint(ECHO_CHAR, "custom-data")
}

fn connect_to(
    builder: SimulatedPeripheralBuilder,
    service: Uuid,
) -> (
    SimulatedPeripheral,
    BleTransport,
    mpsc::Receiver<TransportEvent>,
) {
    let config = BleTransportConfig::new();
    let (link_tx, link_rx) = link_event_channel(config.link_queue_depth);
    let peripheral = builder.build(link_tx);
    let (transport, events) = BleTransport::connect(peripheral.clone(), link_rx, service, config);
    (peripheral, transport, events)
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

/// Connect and wait until negotiation reports the peripheral configured
async fn connect_ready(
    builder: SimulatedPeripheralBuilder,
) -> (
    SimulatedPeripheral,
    BleTransport,
    mpsc::Receiver<TransportEvent>,
) {
    let (peripheral, transport, mut events) = connect_to(builder, SERVICE);
    match next_event(&mut events).await {
        TransportEvent::PeripheralConfigured(_) => {}
        other => panic!("expected PeripheralConfigured, got {:?}", other),
    }
    (peripheral, transport, events)
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn configured_event_fires_exactly_once() {
    let (_peripheral, transport, mut events) = connect_to(scripted_device(), SERVICE);

    match next_event(&mut events).await {
        TransportEvent::PeripheralConfigured(device) => {
            assert_eq!(&device, transport.device_id());
        }
        other => panic!("expected PeripheralConfigured, got {:?}", other),
    }

    // No second lifecycle event for the same negotiation attempt
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn not_configured_without_session_endpoint() {
    let builder = SimulatedPeripheral::builder(SERVICE)
        .endpoint(CONFIG_CHAR, "prov-config")
        .endpoint(VER_CHAR, "proto-ver")
        .responder(VER_CHAR, Responder::Fixed(VERSION_JSON.to_vec()));
    let (_peripheral, _transport, mut events) = connect_to(builder, SERVICE);

    match next_event(&mut events).await {
        TransportEvent::PeripheralNotConfigured(_) => {}
        other => panic!("expected PeripheralNotConfigured, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_service_is_a_terminal_failure() {
    let other_service = Uuid::from_u128(0xdead_beef);
    let (_peripheral, transport, mut events) = connect_to(scripted_device(), other_service);

    match next_event(&mut events).await {
        TransportEvent::Failure(TransportError::ServiceNotFound { service }) => {
            assert_eq!(service, other_service);
        }
        other => panic!("expected ServiceNotFound failure, got {:?}", other),
    }

    // The connection is dead; no exchange can be accepted afterwards
    assert!(transport.send_session_data(b"s0").await.is_err());
}

#[tokio::test]
async fn walk_skips_characteristics_without_metadata() {
    let bare = Uuid::from_u128(0xaaaa);
    let unreadable = Uuid::from_u128(0xbbbb);
    let builder = SimulatedPeripheral::builder(SERVICE)
        .bare_characteristic(bare)
        .unreadable_descriptor(unreadable)
        .endpoint(SESSION_CHAR, "prov-session")
        .endpoint(VER_CHAR, "proto-ver")
        .responder(VER_CHAR, Responder::Fixed(VERSION_JSON.to_vec()));

    // Reaching the configured event proves the walk terminated despite the
    // unresolved characteristics
    let (peripheral, _transport, _events) = connect_ready(builder).await;

    let descriptor_reads: Vec<_> = peripheral
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            RecordedOp::DescriptorRead(characteristic, _) => Some(characteristic),
            _ => None,
        })
        .collect();
    assert!(!descriptor_reads.contains(&bare));
    assert_eq!(descriptor_reads.iter().filter(|&&c| c == unreadable).count(), 1);
}

// ----------------------------------------------------------------------------
// Version Negotiation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn capabilities_decoded_verbatim_and_in_order() {
    let (_peripheral, transport, _events) = connect_ready(scripted_device()).await;

    let capabilities = transport.capabilities().await;
    assert!(capabilities.is_known());
    assert_eq!(
        capabilities.tokens(),
        Some(&["wifi_scan".to_string(), "no_pop".to_string()][..])
    );
    assert!(capabilities.supports("no_pop"));
    assert!(!transport.legacy_auth_mode().await);
}

#[tokio::test]
async fn legacy_success_response_sets_auth_mode_flag() {
    let builder = scripted_device().responder(VER_CHAR, Responder::Fixed(b"Success".to_vec()));
    let (_peripheral, transport, _events) = connect_ready(builder).await;

    assert!(!transport.capabilities().await.is_known());
    assert!(transport.legacy_auth_mode().await);
}

#[tokio::test]
async fn malformed_version_response_leaves_capabilities_unknown() {
    let builder = scripted_device().responder(VER_CHAR, Responder::Fixed(b"bogus".to_vec()));
    let (_peripheral, transport, _events) = connect_ready(builder).await;

    assert!(!transport.capabilities().await.is_known());
    assert!(!transport.legacy_auth_mode().await);
}

// ----------------------------------------------------------------------------
// Request/Response Engine
// ----------------------------------------------------------------------------

#[tokio::test]
async fn echo_exchange_round_trips_payload() {
    let (_peripheral, transport, _events) = connect_ready(scripted_device()).await;

    let payload: Vec<u8> = vec![0x00, 0xff, 0x42, 0x10, 0x00, 0x7f];
    let response = tokio_test::assert_ok!(transport.send_config_data("custom-data", &payload).await);
    assert_eq!(response, payload);
}

#[tokio::test]
async fn session_data_uses_announced_session_characteristic() {
    let (peripheral, transport, _events) = connect_ready(scripted_device()).await;

    let response = tokio_test::assert_ok!(transport.send_session_data(b"hello").await);
    assert_eq!(response, b"hello");
    assert!(peripheral.writes_issued().contains(&SESSION_CHAR));
}

#[tokio::test]
async fn gate_balances_across_sequential_exchanges() {
    let (_peripheral, transport, _events) = connect_ready(scripted_device()).await;

    for i in 0..5u8 {
        let payload = [i; 4];
        let response = transport.send_config_data("custom-data", &payload).await.unwrap();
        assert_eq!(response, payload);
    }

    assert_eq!(transport.gate().acquired_count(), 5);
    assert_eq!(transport.gate().released_count(), 5);
    assert!(transport.gate().is_idle());
}

#[tokio::test]
async fn concurrent_exchanges_are_serialized() {
    let (peripheral, transport, _events) = connect_ready(scripted_device()).await;

    let first = transport.clone();
    let second = transport.clone();
    let a = tokio::spawn(async move { first.send_config_data("custom-data", b"aaaa").await });
    let b = tokio::spawn(async move { second.send_config_data("custom-data", b"bbbb").await });

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // With the gate held across each write/read pair, operations on the
    // echo characteristic must strictly alternate
    let ops: Vec<_> = peripheral
        .operations()
        .into_iter()
        .filter(|op| matches!(op, RecordedOp::Write(c) | RecordedOp::Read(c) if *c == ECHO_CHAR))
        .collect();
    assert_eq!(
        ops,
        vec![
            RecordedOp::Write(ECHO_CHAR),
            RecordedOp::Read(ECHO_CHAR),
            RecordedOp::Write(ECHO_CHAR),
            RecordedOp::Read(ECHO_CHAR),
        ]
    );
    assert_eq!(transport.gate().acquired_count(), 2);
    assert_eq!(transport.gate().released_count(), 2);
}

#[tokio::test]
async fn failed_write_surfaces_error_and_skips_read() {
    let (peripheral, transport, _events) = connect_ready(scripted_device()).await;
    peripheral.fail_writes_on(ECHO_CHAR);

    let result = transport.send_config_data("custom-data", b"data").await;
    assert!(matches!(result, Err(TransportError::WriteFailed { .. })));

    // The paired read must never have been issued
    assert!(!peripheral.reads_issued().contains(&ECHO_CHAR));
    assert_eq!(transport.gate().acquired_count(), 1);
    assert_eq!(transport.gate().released_count(), 1);
}

#[tokio::test]
async fn failed_read_surfaces_error() {
    let (peripheral, transport, _events) = connect_ready(scripted_device()).await;
    peripheral.fail_reads_on(ECHO_CHAR);

    let result = transport.send_config_data("custom-data", b"data").await;
    assert!(matches!(result, Err(TransportError::ReadFailed { .. })));
    assert!(transport.gate().is_idle());
}

#[tokio::test]
async fn unresolved_endpoint_is_an_explicit_error() {
    let (_peripheral, transport, _events) = connect_ready(scripted_device()).await;

    let result = transport.send_config_data("not-an-endpoint", b"data").await;
    match result {
        Err(TransportError::ChannelUnavailable { endpoint }) => {
            assert_eq!(endpoint, "not-an-endpoint");
        }
        other => panic!("expected ChannelUnavailable, got {:?}", other),
    }
    assert!(transport.gate().is_idle());
}

#[tokio::test]
async fn legacy_fallback_characteristic_used_when_name_not_announced() {
    // Firmware that never announced prov-config but still exposes the fixed
    // pre-negotiation characteristic
    let builder = SimulatedPeripheral::builder(SERVICE)
        .endpoint(SESSION_CHAR, "prov-session")
        .endpoint(VER_CHAR, "proto-ver")
        .responder(VER_CHAR, Responder::Fixed(VERSION_JSON.to_vec()))
        .bare_characteristic(LEGACY_CONFIG_UUID);
    let (peripheral, transport, _events) = connect_ready(builder).await;

    let response = tokio_test::assert_ok!(transport.send_config_data("prov-config", b"cfg").await);
    assert_eq!(response, b"cfg");
    assert!(peripheral.writes_issued().contains(&LEGACY_CONFIG_UUID));
}

// ----------------------------------------------------------------------------
// Disconnect Behavior
// ----------------------------------------------------------------------------

async fn wait_for_read(peripheral: &SimulatedPeripheral, characteristic: Uuid) {
    for _ in 0..200 {
        if peripheral.reads_issued().contains(&characteristic) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("read of {} was never issued", characteristic);
}

#[tokio::test]
async fn disconnect_resolves_outstanding_exchange() {
    let builder = scripted_device().responder(ECHO_CHAR, Responder::Silent);
    let (peripheral, transport, mut events) = connect_ready(builder).await;

    let inner = transport.clone();
    let outstanding =
        tokio::spawn(async move { inner.send_config_data("custom-data", b"ping").await });
    wait_for_read(&peripheral, ECHO_CHAR).await;

    transport.disconnect().await;

    let result = timeout(TEST_TIMEOUT, outstanding)
        .await
        .expect("exchange never resolved")
        .unwrap();
    assert!(matches!(result, Err(TransportError::Disconnected)));

    match next_event(&mut events).await {
        TransportEvent::PeripheralDisconnected(_) => {}
        other => panic!("expected PeripheralDisconnected, got {:?}", other),
    }
    assert_eq!(transport.gate().acquired_count(), 1);
    assert_eq!(transport.gate().released_count(), 1);
}

#[tokio::test]
async fn device_side_disconnect_fails_outstanding_exchange() {
    let builder = scripted_device().responder(ECHO_CHAR, Responder::Silent);
    let (peripheral, transport, mut events) = connect_ready(builder).await;

    let inner = transport.clone();
    let outstanding =
        tokio::spawn(async move { inner.send_config_data("custom-data", b"ping").await });
    wait_for_read(&peripheral, ECHO_CHAR).await;

    peripheral.inject_disconnect().await;

    let result = timeout(TEST_TIMEOUT, outstanding)
        .await
        .expect("exchange never resolved")
        .unwrap();
    assert!(matches!(result, Err(TransportError::Disconnected)));

    match next_event(&mut events).await {
        TransportEvent::PeripheralDisconnected(_) => {}
        other => panic!("expected PeripheralDisconnected, got {:?}", other),
    }
    assert!(transport.gate().is_idle());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (_peripheral, transport, mut events) = connect_ready(scripted_device()).await;

    transport.disconnect().await;
    match next_event(&mut events).await {
        TransportEvent::PeripheralDisconnected(_) => {}
        other => panic!("expected PeripheralDisconnected, got {:?}", other),
    }

    // Safe to request again once already disconnected
    transport.disconnect().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

// ----------------------------------------------------------------------------
// Legacy Firmware Variant
// ----------------------------------------------------------------------------

#[tokio::test]
async fn legacy_variant_skips_walk_and_negotiation() {
    let builder = SimulatedPeripheral::builder(LEGACY_SERVICE_UUID)
        .bare_characteristic(LEGACY_SESSION_UUID)
        .bare_characteristic(LEGACY_CONFIG_UUID);
    let (peripheral, transport, mut events) = connect_to(builder, LEGACY_SERVICE_UUID);

    match next_event(&mut events).await {
        TransportEvent::PeripheralConfigured(_) => {}
        other => panic!("expected PeripheralConfigured, got {:?}", other),
    }

    // No descriptor walk and no version exchange happened
    assert!(peripheral
        .operations()
        .iter()
        .all(|op| !matches!(op, RecordedOp::DescriptorRead(_, _))));
    assert!(!transport.capabilities().await.is_known());

    // Exchanges run over the fixed identifiers
    let response = tokio_test::assert_ok!(transport.send_session_data(b"s0").await);
    assert_eq!(response, b"s0");
    assert!(peripheral.writes_issued().contains(&LEGACY_SESSION_UUID));
}
