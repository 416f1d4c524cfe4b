//! Public transport handle
//!
//! [`BleTransport::connect`] spawns the per-connection state machine task
//! and returns a cheap handle plus the stream of lifecycle events. Exchange
//! methods acquire the transport gate, forward one command to the task and
//! await the reply, so the caller-facing API is synchronous per call while
//! the radio side stays fully event driven.

use std::sync::Arc;

use provlink_core::{
    DeviceCapabilities, DeviceId, Result, TransportError, TransportEvent, ENDPOINT_SESSION,
};
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::connection::{CapabilityReport, Command, ConnectionTask};
use crate::gate::TransportGate;
use crate::link::{GattLink, LinkEventReceiver};

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// Handle to one provisioning connection
///
/// Cloneable; all clones share the same gate, so exchanges stay serialized
/// no matter how many handles exist.
#[derive(Clone)]
pub struct BleTransport {
    commands: mpsc::Sender<Command>,
    gate: Arc<TransportGate>,
    report: Arc<RwLock<CapabilityReport>>,
    device_id: DeviceId,
}

impl BleTransport {
    /// Begin connecting to a device over an established link
    ///
    /// Returns immediately; connection progress is observed through the
    /// returned event stream. Exactly one `PeripheralConfigured` /
    /// `PeripheralNotConfigured` event fires once negotiation finishes.
    pub fn connect<L: GattLink>(
        link: L,
        link_events: LinkEventReceiver,
        service: Uuid,
        config: BleTransportConfig,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_depth);
        let (command_tx, command_rx) = mpsc::channel(1);
        let report = Arc::new(RwLock::new(CapabilityReport::default()));
        let device_id = link.device_id();

        let task = ConnectionTask::new(
            link,
            link_events,
            service,
            config,
            command_rx,
            event_tx,
            Arc::clone(&report),
        );
        tokio::spawn(task.run());

        let transport = Self {
            commands: command_tx,
            gate: TransportGate::new(),
            report,
            device_id,
        };
        (transport, event_rx)
    }

    /// Exchange one payload with the secure-session endpoint
    pub async fn send_session_data(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.exchange(ENDPOINT_SESSION, payload).await
    }

    /// Exchange one payload with a named config endpoint
    pub async fn send_config_data(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.exchange(endpoint, payload).await
    }

    async fn exchange(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>> {
        // Held until the reply is delivered; enforces one outstanding
        // write/read pair per connection
        let _permit = self.gate.acquire().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Exchange {
                endpoint: endpoint.to_string(),
                payload: payload.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::Shutdown)?;

        // The task resolves every accepted exchange exactly once; a dropped
        // reply sender means it stopped without doing so
        reply_rx.await.map_err(|_| TransportError::Disconnected)?
    }

    /// Request teardown; idempotent and safe while an exchange is
    /// outstanding (the waiting caller gets a failure completion)
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect).await;
    }

    /// Capability set negotiated with the device (three-state)
    pub async fn capabilities(&self) -> DeviceCapabilities {
        self.report.read().await.capabilities.clone()
    }

    /// Whether legacy firmware signalled auth-mode data via `SUCCESS`
    pub async fn legacy_auth_mode(&self) -> bool {
        self.report.read().await.legacy_auth_mode
    }

    /// Identifier of the device this transport is bound to
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The gate serializing exchanges; exposed for balance assertions
    pub fn gate(&self) -> &TransportGate {
        &self.gate
    }
}
