//! Connection state machine
//!
//! One tokio task owns everything mutable about a connection: the endpoint
//! registry, descriptor-walk progress, the single pending exchange and the
//! capability report. Radio completions and caller commands arrive on
//! channels and are routed to the handler for the current phase, so there is
//! no shared listener state and no cross-event race.
//!
//! States are monotonic through
//! `Idle → Connecting → ServiceDiscovery → DescriptorWalk →
//! VersionNegotiation → Ready`; `Disconnected` and `Failed` are terminal and
//! reachable from anywhere.

use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use provlink_core::endpoints::{
    LEGACY_CONFIG_UUID, LEGACY_PROTO_VER_UUID, LEGACY_SERVICE_UUID, LEGACY_SESSION_UUID,
};
use provlink_core::{
    decode_version_response, legacy_fallback, DeviceCapabilities, EndpointRegistry, Result,
    TransportError, TransportEvent, VersionDecode, ENDPOINT_CONFIG, ENDPOINT_PROTO_VER,
    ENDPOINT_SESSION,
};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::link::{GattCharacteristic, GattLink, GattService, LinkEvent, LinkEventReceiver};
use crate::walker::DescriptorWalk;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    ServiceDiscovery,
    DescriptorWalk,
    VersionNegotiation,
    Ready,
    Disconnected,
    Failed,
}

impl ConnectionState {
    fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::ServiceDiscovery => "service-discovery",
            ConnectionState::DescriptorWalk => "descriptor-walk",
            ConnectionState::VersionNegotiation => "version-negotiation",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Protocol Variant
// ----------------------------------------------------------------------------

/// Firmware protocol flavor, chosen once at connect time from the advertised
/// service identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Endpoint names are announced via descriptors and the version endpoint
    /// is negotiated
    Dynamic,
    /// Pre-negotiation firmware with fixed characteristic identifiers; no
    /// walk, no version exchange
    LegacyFixed,
}

impl ProtocolVariant {
    pub fn from_service(service: Uuid) -> Self {
        if service == LEGACY_SERVICE_UUID {
            ProtocolVariant::LegacyFixed
        } else {
            ProtocolVariant::Dynamic
        }
    }
}

/// Fixed identifiers seeded into the registry for legacy firmware
const LEGACY_ENDPOINTS: [(&str, Uuid); 3] = [
    (ENDPOINT_SESSION, LEGACY_SESSION_UUID),
    (ENDPOINT_CONFIG, LEGACY_CONFIG_UUID),
    (ENDPOINT_PROTO_VER, LEGACY_PROTO_VER_UUID),
];

// ----------------------------------------------------------------------------
// Capability Report
// ----------------------------------------------------------------------------

/// Negotiation outcome shared with the transport handle
#[derive(Debug, Clone, Default)]
pub struct CapabilityReport {
    /// Three-state capability set; never collapsed (see `provlink-core`)
    pub capabilities: DeviceCapabilities,
    /// Set when legacy firmware answered the version exchange with `SUCCESS`;
    /// Wi-Fi auth-mode data will then appear in a later scan response
    pub legacy_auth_mode: bool,
}

// ----------------------------------------------------------------------------
// Commands and Pending Exchange
// ----------------------------------------------------------------------------

type ExchangeReply = oneshot::Sender<Result<Vec<u8>>>;

/// Caller requests handled by the connection task
pub(crate) enum Command {
    Exchange {
        endpoint: String,
        payload: Vec<u8>,
        reply: ExchangeReply,
    },
    Disconnect,
}

/// The single in-flight write/read pair; the gate guarantees at most one
struct PendingExchange {
    endpoint: String,
    characteristic: Uuid,
    reply: ExchangeReply,
    issued_at: Instant,
}

// ----------------------------------------------------------------------------
// Connection Task
// ----------------------------------------------------------------------------

pub(crate) struct ConnectionTask<L: GattLink> {
    link: L,
    service: Uuid,
    variant: ProtocolVariant,
    config: BleTransportConfig,
    state: ConnectionState,
    registry: EndpointRegistry,
    characteristics: Vec<GattCharacteristic>,
    walk: Option<DescriptorWalk>,
    version_characteristic: Option<Uuid>,
    pending: Option<PendingExchange>,
    report: Arc<RwLock<CapabilityReport>>,
    events: mpsc::Sender<TransportEvent>,
    link_events: LinkEventReceiver,
    commands: mpsc::Receiver<Command>,
    delivery: mpsc::UnboundedSender<(ExchangeReply, Result<Vec<u8>>)>,
    running: bool,
}

impl<L: GattLink> ConnectionTask<L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        link: L,
        link_events: LinkEventReceiver,
        service: Uuid,
        config: BleTransportConfig,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<TransportEvent>,
        report: Arc<RwLock<CapabilityReport>>,
    ) -> Self {
        // Dedicated delivery task: successful responses are handed back to
        // callers here, never inline on the event loop, so a caller that
        // immediately issues the next exchange cannot re-enter it.
        let (delivery, mut delivery_rx) =
            mpsc::unbounded_channel::<(ExchangeReply, Result<Vec<u8>>)>();
        tokio::spawn(async move {
            while let Some((reply, result)) = delivery_rx.recv().await {
                let _ = reply.send(result);
            }
        });

        Self {
            variant: ProtocolVariant::from_service(service),
            link,
            service,
            config,
            state: ConnectionState::Idle,
            registry: EndpointRegistry::new(),
            characteristics: Vec::new(),
            walk: None,
            version_characteristic: None,
            pending: None,
            report,
            events,
            link_events,
            commands,
            delivery,
            running: true,
        }
    }

    /// Main loop: consume link events and caller commands until a terminal
    /// state is reached
    pub(crate) async fn run(mut self) {
        info!(
            "Connecting to {} (service {}, {:?} variant)",
            self.link.device_id(),
            self.service,
            self.variant
        );
        self.state = ConnectionState::Connecting;
        self.link.connect().await;

        while self.running {
            tokio::select! {
                event = self.link_events.recv() => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => {
                        self.fail(TransportError::connection("link event channel closed"))
                            .await;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Transport handle dropped; tear the connection down
                        self.resolve_pending(Err(TransportError::Shutdown));
                        self.link.disconnect().await;
                        self.running = false;
                    }
                },
            }
        }

        debug!("Connection task for {} stopped", self.link.device_id());
    }

    // ------------------------------------------------------------------
    // Link event routing
    // ------------------------------------------------------------------

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                if self.state == ConnectionState::Connecting {
                    info!("Connected; discovering services");
                    self.state = ConnectionState::ServiceDiscovery;
                    self.link.discover_services().await;
                }
            }
            LinkEvent::ServicesDiscovered { services } => {
                self.on_services_discovered(services).await;
            }
            LinkEvent::DescriptorRead {
                characteristic,
                value,
                ..
            } => {
                self.on_descriptor_read(characteristic, value).await;
            }
            LinkEvent::WriteCompleted {
                characteristic,
                status,
            } => {
                self.on_write_completed(characteristic, status).await;
            }
            LinkEvent::ReadCompleted {
                characteristic,
                value,
            } => {
                self.on_read_completed(characteristic, value).await;
            }
            LinkEvent::Disconnected => self.on_disconnected().await,
            LinkEvent::LinkFailed { reason } => {
                self.fail(TransportError::connection(reason)).await;
            }
        }
    }

    async fn on_services_discovered(&mut self, services: Vec<GattService>) {
        if self.state != ConnectionState::ServiceDiscovery {
            return;
        }

        let Some(service) = services.into_iter().find(|s| s.uuid == self.service) else {
            error!("Provisioning service {} not found on device", self.service);
            self.fail(TransportError::ServiceNotFound {
                service: self.service,
            })
            .await;
            return;
        };

        self.characteristics = service.characteristics;
        debug!(
            "Service exposes {} characteristics",
            self.characteristics.len()
        );

        match self.variant {
            ProtocolVariant::LegacyFixed => {
                for (name, uuid) in LEGACY_ENDPOINTS {
                    if self.has_characteristic(uuid) {
                        self.registry.insert(name, uuid);
                    }
                }
                self.finish_negotiation().await;
            }
            ProtocolVariant::Dynamic => {
                self.state = ConnectionState::DescriptorWalk;
                let mut walk = DescriptorWalk::new(self.characteristics.clone());
                let next = walk.next_read(&self.registry);
                self.walk = Some(walk);
                match next {
                    Some((characteristic, descriptor)) => {
                        self.link.read_descriptor(characteristic, descriptor).await;
                    }
                    None => self.begin_negotiation().await,
                }
            }
        }
    }

    async fn on_descriptor_read(
        &mut self,
        characteristic: Uuid,
        value: std::result::Result<Vec<u8>, String>,
    ) {
        if self.state != ConnectionState::DescriptorWalk {
            return;
        }

        match value {
            Ok(bytes) => {
                let name = String::from_utf8_lossy(&bytes).to_string();
                self.registry.insert(name, characteristic);
            }
            Err(reason) => {
                // The characteristic stays unresolved; the walk already
                // marked it attempted, so it will not be reselected
                warn!("Descriptor read failed on {}: {}", characteristic, reason);
            }
        }

        let next = self
            .walk
            .as_mut()
            .and_then(|walk| walk.next_read(&self.registry));
        match next {
            Some((characteristic, descriptor)) => {
                self.link.read_descriptor(characteristic, descriptor).await;
            }
            None => self.begin_negotiation().await,
        }
    }

    async fn begin_negotiation(&mut self) {
        self.state = ConnectionState::VersionNegotiation;
        self.walk = None;
        info!(
            "Registry complete with {} endpoints; negotiating protocol version",
            self.registry.len()
        );

        let resolved = self
            .registry
            .resolve(ENDPOINT_PROTO_VER)
            .filter(|&uuid| self.has_characteristic(uuid));
        match resolved {
            Some(characteristic) => {
                self.version_characteristic = Some(characteristic);
                let token = self.config.proto_version.clone();
                self.link
                    .write_characteristic(characteristic, token.as_bytes())
                    .await;
            }
            None => {
                warn!("No version endpoint announced; capabilities stay unknown");
                self.finish_negotiation().await;
            }
        }
    }

    async fn on_write_completed(
        &mut self,
        characteristic: Uuid,
        status: std::result::Result<(), String>,
    ) {
        match self.state {
            ConnectionState::VersionNegotiation => {
                if self.version_characteristic != Some(characteristic) {
                    return;
                }
                match status {
                    // Read back the same characteristic for the response
                    Ok(()) => self.link.read_characteristic(characteristic).await,
                    Err(reason) => self.fail(TransportError::write(reason)).await,
                }
            }
            ConnectionState::Ready => {
                let matches = self
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.characteristic == characteristic);
                if !matches {
                    return;
                }
                match status {
                    Ok(()) => self.link.read_characteristic(characteristic).await,
                    Err(reason) => {
                        // A failed write never triggers the paired read
                        self.resolve_pending(Err(TransportError::write(reason)));
                    }
                }
            }
            _ => {}
        }
    }

    async fn on_read_completed(
        &mut self,
        characteristic: Uuid,
        value: std::result::Result<Vec<u8>, String>,
    ) {
        match self.state {
            ConnectionState::VersionNegotiation => {
                if self.version_characteristic != Some(characteristic) {
                    return;
                }
                match value {
                    Ok(bytes) => {
                        self.apply_version_response(&bytes).await;
                        self.finish_negotiation().await;
                    }
                    Err(reason) => self.fail(TransportError::read(reason)).await,
                }
            }
            ConnectionState::Ready => {
                let matches = self
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.characteristic == characteristic);
                if !matches {
                    return;
                }
                let Some(pending) = self.pending.take() else {
                    return;
                };
                debug!(
                    "Exchange on '{}' finished after {:?}",
                    pending.endpoint,
                    pending.issued_at.elapsed()
                );
                match value {
                    Ok(bytes) => {
                        // Hand the response to the delivery task rather than
                        // resolving inline on the event loop
                        let _ = self.delivery.send((pending.reply, Ok(bytes)));
                    }
                    Err(reason) => {
                        let _ = pending.reply.send(Err(TransportError::read(reason)));
                    }
                }
            }
            _ => {}
        }
    }

    async fn apply_version_response(&mut self, raw: &[u8]) {
        let mut report = self.report.write().await;
        match decode_version_response(raw) {
            VersionDecode::Info(info) => {
                report.capabilities = DeviceCapabilities::Known(info.prov.capabilities);
            }
            VersionDecode::LegacySuccess => {
                report.legacy_auth_mode = true;
            }
            VersionDecode::Unrecognized => {}
        }
    }

    /// Enter Ready and report exactly one configured/not-configured event
    async fn finish_negotiation(&mut self) {
        self.state = ConnectionState::Ready;
        let device = self.link.device_id();
        let event = if self.registry.contains(ENDPOINT_SESSION) {
            info!("Peripheral {} is configured for provisioning", device);
            TransportEvent::PeripheralConfigured(device)
        } else {
            info!("Peripheral {} announced no session endpoint", device);
            TransportEvent::PeripheralNotConfigured(device)
        };
        let _ = self.events.send(event).await;
    }

    async fn on_disconnected(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ConnectionState::Disconnected;
        self.resolve_pending(Err(TransportError::Disconnected));
        info!("Device {} disconnected", self.link.device_id());
        let _ = self
            .events
            .send(TransportEvent::PeripheralDisconnected(
                TransportError::Disconnected,
            ))
            .await;
        self.running = false;
    }

    async fn fail(&mut self, error: TransportError) {
        if self.state.is_terminal() {
            return;
        }
        error!("Connection failed: {}", error);
        self.state = ConnectionState::Failed;
        self.resolve_pending(Err(error.clone()));
        let _ = self.events.send(TransportEvent::Failure(error)).await;
        self.running = false;
    }

    // ------------------------------------------------------------------
    // Caller commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Exchange {
                endpoint,
                payload,
                reply,
            } => self.handle_exchange(endpoint, payload, reply).await,
            Command::Disconnect => {
                if self.state.is_terminal() {
                    return;
                }
                self.resolve_pending(Err(TransportError::Disconnected));
                // Completion arrives as a Disconnected link event
                self.link.disconnect().await;
            }
        }
    }

    async fn handle_exchange(&mut self, endpoint: String, payload: Vec<u8>, reply: ExchangeReply) {
        if self.state != ConnectionState::Ready {
            let _ = reply.send(Err(TransportError::NotReady {
                state: self.state.to_string(),
            }));
            return;
        }
        if self.pending.is_some() {
            // The gate makes this unreachable; refuse rather than clobber
            // the outstanding exchange
            let _ = reply.send(Err(TransportError::NotReady {
                state: "exchange outstanding".to_string(),
            }));
            return;
        }

        let resolved = self
            .registry
            .resolve(&endpoint)
            .filter(|&uuid| self.has_characteristic(uuid))
            .or_else(|| {
                let fallback = legacy_fallback(&endpoint);
                self.has_characteristic(fallback).then_some(fallback)
            });
        let Some(characteristic) = resolved else {
            warn!("No characteristic available for endpoint '{}'", endpoint);
            let _ = reply.send(Err(TransportError::ChannelUnavailable { endpoint }));
            return;
        };

        debug!(
            "Exchange on '{}' via {} ({} bytes)",
            endpoint,
            characteristic,
            payload.len()
        );
        self.pending = Some(PendingExchange {
            endpoint,
            characteristic,
            reply,
            issued_at: Instant::now(),
        });
        self.link.write_characteristic(characteristic, &payload).await;
    }

    fn resolve_pending(&mut self, result: Result<Vec<u8>>) {
        if let Some(pending) = self.pending.take() {
            debug!("Resolving outstanding exchange on '{}'", pending.endpoint);
            let _ = pending.reply.send(result);
        }
    }

    fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.iter().any(|c| c.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_selected_from_service_identifier() {
        assert_eq!(
            ProtocolVariant::from_service(LEGACY_SERVICE_UUID),
            ProtocolVariant::LegacyFixed
        );
        assert_eq!(
            ProtocolVariant::from_service(Uuid::from_u128(0x021a9004_0382_4aea_bff4_6b3f1c5adfb4)),
            ProtocolVariant::Dynamic
        );
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Ready.is_terminal());
        assert!(!ConnectionState::Idle.is_terminal());
    }
}
