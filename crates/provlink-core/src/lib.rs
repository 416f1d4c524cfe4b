//! Protocol types for the provlink BLE provisioning transport
//!
//! This crate holds everything about the provisioning protocol that does not
//! touch a radio: the fixed endpoint-name table and its legacy fallback
//! identifiers, the write-once endpoint registry populated during descriptor
//! discovery, version/capability decoding, and the error and event types the
//! transport exposes to the session/security collaborator.
//!
//! The transport itself lives in `provlink-ble`.

pub mod capability;
pub mod endpoints;
pub mod error;
pub mod events;

// Public API exports
pub use capability::{decode_version_response, DeviceCapabilities, VersionDecode, VersionInfo};
pub use endpoints::{
    legacy_fallback, EndpointRegistry, ENDPOINT_CONFIG, ENDPOINT_PROTO_VER, ENDPOINT_SCAN,
    ENDPOINT_SESSION, LEGACY_SERVICE_UUID,
};
pub use error::{Result, TransportError};
pub use events::{DeviceId, TransportEvent};
