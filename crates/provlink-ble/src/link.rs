//! GATT link abstraction
//!
//! The platform radio is consumed through the [`GattLink`] trait: operations
//! are *issued* by the connection task and their completions arrive as
//! [`LinkEvent`]s on a single channel, in the order the underlying operations
//! were issued. The connection task is the only consumer of that stream, so
//! every phase handler sees a strictly-ordered view of the radio.
//!
//! The production backend is [`btleplug::BtleplugLink`]; tests drive the same
//! task through [`crate::testing::SimulatedPeripheral`].

pub mod btleplug;

use async_trait::async_trait;
use provlink_core::DeviceId;
use tokio::sync::mpsc;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Discovered Attribute Layout
// ----------------------------------------------------------------------------

/// A characteristic enumerated on a GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    /// Descriptors attached to this characteristic
    pub descriptors: Vec<Uuid>,
}

/// A service enumerated on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

/// Completion events delivered by a [`GattLink`]
///
/// Per-operation failures carry the radio layer's reason as text; the
/// connection task maps them onto transport errors.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Platform-level connection established
    Connected,
    /// Service/attribute enumeration finished
    ServicesDiscovered { services: Vec<GattService> },
    /// A descriptor read completed
    DescriptorRead {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Result<Vec<u8>, String>,
    },
    /// A characteristic write completed
    WriteCompleted {
        characteristic: Uuid,
        status: Result<(), String>,
    },
    /// A characteristic read completed
    ReadCompleted {
        characteristic: Uuid,
        value: Result<Vec<u8>, String>,
    },
    /// The device disconnected, solicited or not
    Disconnected,
    /// Radio-level failure outside any single operation
    LinkFailed { reason: String },
}

/// Sending half of a link event channel
pub type LinkEventSender = mpsc::Sender<LinkEvent>;

/// Receiving half of a link event channel
pub type LinkEventReceiver = mpsc::Receiver<LinkEvent>;

/// Create the event channel wiring a link to its connection task
pub fn link_event_channel(depth: usize) -> (LinkEventSender, LinkEventReceiver) {
    mpsc::channel(depth)
}

// ----------------------------------------------------------------------------
// Link Trait
// ----------------------------------------------------------------------------

/// One GATT connection to one physical device
///
/// All methods issue the operation and return immediately; outcomes are
/// reported through the link's event channel. Implementations must deliver
/// at most one completion event per issued operation.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    /// Identifier of the device this link is bound to
    fn device_id(&self) -> DeviceId;

    /// Begin platform-level connection; completion arrives as
    /// [`LinkEvent::Connected`] or [`LinkEvent::LinkFailed`]
    async fn connect(&self);

    /// Enumerate services and characteristics on the device
    async fn discover_services(&self);

    /// Write `payload` to a characteristic with the default (acknowledged)
    /// write semantics
    async fn write_characteristic(&self, characteristic: Uuid, payload: &[u8]);

    /// Read the current value of a characteristic
    async fn read_characteristic(&self, characteristic: Uuid);

    /// Read a descriptor attached to a characteristic
    async fn read_descriptor(&self, characteristic: Uuid, descriptor: Uuid);

    /// Tear the connection down; completion arrives as
    /// [`LinkEvent::Disconnected`]
    async fn disconnect(&self);
}
