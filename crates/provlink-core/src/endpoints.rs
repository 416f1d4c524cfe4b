//! Endpoint names and the name → characteristic registry
//!
//! Firmware announces which logical endpoint each characteristic carries via
//! a readable descriptor, so the mapping is discovered at connect time rather
//! than hard-coded. The endpoint name strings and the legacy fallback
//! identifiers below are a fixed compatibility contract shared with firmware
//! and must match it bit-for-bit.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Endpoint Name Table
// ----------------------------------------------------------------------------

/// Secure-session establishment endpoint
pub const ENDPOINT_SESSION: &str = "prov-session";

/// Provisioning configuration endpoint
pub const ENDPOINT_CONFIG: &str = "prov-config";

/// Wi-Fi scan endpoint
pub const ENDPOINT_SCAN: &str = "prov-scan";

/// Protocol version / capability endpoint
pub const ENDPOINT_PROTO_VER: &str = "proto-ver";

// ----------------------------------------------------------------------------
// Legacy Fixed Identifiers
// ----------------------------------------------------------------------------

/// Fixed session characteristic on firmware that predates dynamic negotiation
pub const LEGACY_SESSION_UUID: Uuid = Uuid::from_u128(0x0000ff51_0000_1000_8000_00805f9b34fb);

/// Fixed config characteristic on firmware that predates dynamic negotiation
pub const LEGACY_CONFIG_UUID: Uuid = Uuid::from_u128(0x0000ff52_0000_1000_8000_00805f9b34fb);

/// Fixed version characteristic on firmware that predates dynamic negotiation
pub const LEGACY_PROTO_VER_UUID: Uuid = Uuid::from_u128(0x0000ff53_0000_1000_8000_00805f9b34fb);

/// Service identifier advertised by firmware that predates dynamic
/// negotiation; newer firmware advertises a per-device service instead
pub const LEGACY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffff_0000_1000_8000_00805f9b34fb);

/// Legacy fallback characteristic for an endpoint name
///
/// Older firmware exposes fixed identifiers instead of descriptor-announced
/// ones: the session endpoint on ff51 and every config-style endpoint on
/// ff52. The version endpoint has its own slot.
pub fn legacy_fallback(endpoint: &str) -> Uuid {
    match endpoint {
        ENDPOINT_SESSION => LEGACY_SESSION_UUID,
        ENDPOINT_PROTO_VER => LEGACY_PROTO_VER_UUID,
        _ => LEGACY_CONFIG_UUID,
    }
}

// ----------------------------------------------------------------------------
// Endpoint Registry
// ----------------------------------------------------------------------------

/// Write-once mapping from endpoint name to characteristic identifier
///
/// Populated during the descriptor walk and immutable once the connection
/// reaches the ready state; the state machine never hands out a mutable
/// reference after that point.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    entries: HashMap<String, Uuid>,
}

impl EndpointRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a discovered endpoint; entries are write-once
    ///
    /// Returns `true` if the entry was inserted, `false` if the name was
    /// already mapped (the existing entry is kept).
    pub fn insert(&mut self, name: impl Into<String>, characteristic: Uuid) -> bool {
        let name = name.into();
        if self.entries.contains_key(&name) {
            debug!("Ignoring duplicate endpoint entry '{}'", name);
            return false;
        }
        debug!("Endpoint '{}' resolved to {}", name, characteristic);
        self.entries.insert(name, characteristic);
        true
    }

    /// Resolve an endpoint name to its characteristic
    pub fn resolve(&self, name: &str) -> Option<Uuid> {
        self.entries.get(name).copied()
    }

    /// Whether an endpoint name is present
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether a characteristic already appears as a registry value
    ///
    /// The descriptor walker uses this to pick the next unresolved
    /// characteristic.
    pub fn contains_characteristic(&self, characteristic: Uuid) -> bool {
        self.entries.values().any(|&c| c == characteristic)
    }

    /// Number of resolved endpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
