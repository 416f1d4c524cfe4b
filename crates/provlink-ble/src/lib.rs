//! BLE provisioning transport with connect-time endpoint discovery
//!
//! Controller-side transport for provisioning firmware over a GATT service
//! whose endpoint → characteristic mapping is not fixed: each characteristic
//! announces its logical endpoint name in a readable descriptor, discovered
//! during connection setup. Once negotiation completes, callers exchange
//! opaque request/response payloads with named endpoints; the transport
//! guarantees at most one exchange in flight and exactly one completion per
//! accepted call.
//!
//! ## Architecture
//!
//! - [`link`] - GATT link abstraction and the btleplug backend
//! - [`config`] - Transport configuration
//! - [`gate`] - Single-permit gate serializing exchanges
//! - [`walker`] - Descriptor walk resolving endpoint names
//! - [`connection`] - Per-connection state machine task
//! - [`transport`] - Public handle
//! - [`testing`] - Scripted peripheral for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provlink_ble::{BleTransport, BleTransportConfig};
//! use provlink_ble::link::{link_event_channel, btleplug::BtleplugLink};
//! use uuid::Uuid;
//!
//! # async fn example(adapter: btleplug::platform::Adapter,
//! #                  peripheral: btleplug::platform::Peripheral,
//! #                  service: Uuid) {
//! let config = BleTransportConfig::new();
//! let (link_tx, link_rx) = link_event_channel(config.link_queue_depth);
//! let link = BtleplugLink::new(adapter, peripheral, link_tx);
//!
//! let (transport, mut events) = BleTransport::connect(link, link_rx, service, config);
//!
//! // Wait for PeripheralConfigured, then:
//! let response = transport.send_session_data(b"s0").await;
//! # let _ = (response, events.recv().await);
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod gate;
pub mod link;
pub mod testing;
pub mod transport;
pub mod walker;

// Public API exports
pub use config::BleTransportConfig;
pub use connection::{CapabilityReport, ConnectionState, ProtocolVariant};
pub use gate::{GatePermit, TransportGate};
pub use link::{btleplug::BtleplugLink, link_event_channel, GattLink, LinkEvent};
pub use transport::BleTransport;

// Re-export the protocol types callers interact with
pub use provlink_core::{
    DeviceCapabilities, DeviceId, Result, TransportError, TransportEvent, ENDPOINT_CONFIG,
    ENDPOINT_PROTO_VER, ENDPOINT_SCAN, ENDPOINT_SESSION,
};
