//! BLE transport configuration

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the provisioning transport
///
/// There is deliberately no exchange timeout here: the session/security
/// collaborator imposes its own deadline and treats non-completion as fatal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BleTransportConfig {
    /// Version token written to the version endpoint during negotiation
    pub proto_version: String,
    /// Queue depth for caller-facing transport events
    pub event_queue_depth: usize,
    /// Queue depth for radio-level link events
    pub link_queue_depth: usize,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            proto_version: "V0.2".to_string(),
            event_queue_depth: 16,
            link_queue_depth: 32,
        }
    }
}

impl BleTransportConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the version token sent during negotiation
    pub fn with_proto_version(mut self, version: String) -> Self {
        self.proto_version = version;
        self
    }

    /// Set the caller-facing event queue depth
    pub fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }

    /// Set the link event queue depth
    pub fn with_link_queue_depth(mut self, depth: usize) -> Self {
        self.link_queue_depth = depth;
        self
    }
}
