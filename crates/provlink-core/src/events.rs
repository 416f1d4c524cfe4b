//! Transport-level events delivered to the session/security collaborator

use core::fmt;

use crate::error::TransportError;

// ----------------------------------------------------------------------------
// Device Identifier
// ----------------------------------------------------------------------------

/// Opaque identifier for the peripheral a transport is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Connection-lifecycle events emitted by the transport
///
/// Exactly one of `PeripheralConfigured` / `PeripheralNotConfigured` fires
/// per negotiation attempt; it is the signal callers use to decide whether
/// secure-session provisioning is available on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Negotiation finished and the device exposes a session endpoint
    PeripheralConfigured(DeviceId),
    /// Negotiation finished but no session endpoint was announced
    PeripheralNotConfigured(DeviceId),
    /// The device disconnected; distinct from a generic failure
    PeripheralDisconnected(TransportError),
    /// Radio-level failure during connect, discovery or negotiation
    Failure(TransportError),
}
