//! Error types for the provisioning transport
//!
//! Every radio-level failure is surfaced to the caller that issued the
//! operation; nothing is retried internally — link-level retries belong to
//! the underlying radio stack.

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the provisioning transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Provisioning service {service} not found on device")]
    ServiceNotFound { service: Uuid },

    #[error("No characteristic available for endpoint '{endpoint}'")]
    ChannelUnavailable { endpoint: String },

    #[error("Write to characteristic failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Read from characteristic failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transport is not ready: {state}")]
    NotReady { state: String },

    #[error("Transport shut down")]
    Shutdown,
}

/// Convenience alias used throughout the provlink crates
pub type Result<T> = core::result::Result<T, TransportError>;

impl TransportError {
    /// Connection failure with a formatted reason
    pub fn connection(reason: impl Into<String>) -> Self {
        TransportError::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Write failure with a formatted reason
    pub fn write(reason: impl Into<String>) -> Self {
        TransportError::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Read failure with a formatted reason
    pub fn read(reason: impl Into<String>) -> Self {
        TransportError::ReadFailed {
            reason: reason.into(),
        }
    }
}
