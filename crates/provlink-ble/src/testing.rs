//! Simulated peripheral for driving the transport in tests
//!
//! Implements [`GattLink`] over a scripted GATT table: descriptor values
//! announce endpoint names exactly the way provisioning firmware does, and
//! each characteristic answers reads through a configurable responder.
//! Issued operations are recorded so tests can assert ordering properties
//! (e.g. that a failed write never triggers its paired read).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use provlink_core::DeviceId;
use uuid::Uuid;

use crate::link::{GattCharacteristic, GattLink, GattService, LinkEvent, LinkEventSender};

/// Characteristic User Description descriptor, the slot firmware uses to
/// announce endpoint names
pub const USER_DESCRIPTION_UUID: Uuid = Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);

// ----------------------------------------------------------------------------
// Responders
// ----------------------------------------------------------------------------

/// How a simulated characteristic answers a read
#[derive(Debug, Clone)]
pub enum Responder {
    /// Return whatever was last written to the characteristic
    Echo,
    /// Return a fixed payload
    Fixed(Vec<u8>),
    /// Never answer; the read is recorded but no completion event is sent
    Silent,
}

/// One issued radio operation, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    Write(Uuid),
    Read(Uuid),
    DescriptorRead(Uuid, Uuid),
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for a scripted peripheral exposing one provisioning service
pub struct SimulatedPeripheralBuilder {
    service: Uuid,
    characteristics: Vec<GattCharacteristic>,
    descriptor_values: HashMap<(Uuid, Uuid), Vec<u8>>,
    responders: HashMap<Uuid, Responder>,
    unreadable_descriptors: HashSet<(Uuid, Uuid)>,
}

impl SimulatedPeripheralBuilder {
    /// Add a characteristic whose user-description descriptor announces
    /// `endpoint`
    pub fn endpoint(mut self, characteristic: Uuid, endpoint: &str) -> Self {
        self.characteristics.push(GattCharacteristic {
            uuid: characteristic,
            descriptors: vec![USER_DESCRIPTION_UUID],
        });
        self.descriptor_values.insert(
            (characteristic, USER_DESCRIPTION_UUID),
            endpoint.as_bytes().to_vec(),
        );
        self
    }

    /// Add a characteristic with no descriptor at all
    pub fn bare_characteristic(mut self, characteristic: Uuid) -> Self {
        self.characteristics.push(GattCharacteristic {
            uuid: characteristic,
            descriptors: Vec::new(),
        });
        self
    }

    /// Add a characteristic whose descriptor exists but cannot be read
    pub fn unreadable_descriptor(mut self, characteristic: Uuid) -> Self {
        self.characteristics.push(GattCharacteristic {
            uuid: characteristic,
            descriptors: vec![USER_DESCRIPTION_UUID],
        });
        self.unreadable_descriptors
            .insert((characteristic, USER_DESCRIPTION_UUID));
        self
    }

    /// Script how a characteristic answers reads (default: [`Responder::Echo`])
    pub fn responder(mut self, characteristic: Uuid, responder: Responder) -> Self {
        self.responders.insert(characteristic, responder);
        self
    }

    /// Finish the script and wire the peripheral to a link event channel
    pub fn build(self, events: LinkEventSender) -> SimulatedPeripheral {
        SimulatedPeripheral {
            inner: Arc::new(SimState {
                events,
                services: vec![GattService {
                    uuid: self.service,
                    characteristics: self.characteristics,
                }],
                descriptor_values: self.descriptor_values,
                unreadable_descriptors: self.unreadable_descriptors,
                responders: Mutex::new(self.responders),
                written: Mutex::new(HashMap::new()),
                failing_writes: Mutex::new(HashSet::new()),
                failing_reads: Mutex::new(HashSet::new()),
                operations: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Simulated Peripheral
// ----------------------------------------------------------------------------

/// Scripted [`GattLink`] used by the crate's tests
#[derive(Clone)]
pub struct SimulatedPeripheral {
    inner: Arc<SimState>,
}

struct SimState {
    events: LinkEventSender,
    services: Vec<GattService>,
    descriptor_values: HashMap<(Uuid, Uuid), Vec<u8>>,
    unreadable_descriptors: HashSet<(Uuid, Uuid)>,
    responders: Mutex<HashMap<Uuid, Responder>>,
    written: Mutex<HashMap<Uuid, Vec<u8>>>,
    failing_writes: Mutex<HashSet<Uuid>>,
    failing_reads: Mutex<HashSet<Uuid>>,
    operations: Mutex<Vec<RecordedOp>>,
    connected: AtomicBool,
}

impl SimulatedPeripheral {
    /// Start scripting a peripheral advertising `service`
    pub fn builder(service: Uuid) -> SimulatedPeripheralBuilder {
        SimulatedPeripheralBuilder {
            service,
            characteristics: Vec::new(),
            descriptor_values: HashMap::new(),
            responders: HashMap::new(),
            unreadable_descriptors: HashSet::new(),
        }
    }

    /// Make future writes to `characteristic` fail at the radio layer
    pub fn fail_writes_on(&self, characteristic: Uuid) {
        self.inner.failing_writes.lock().unwrap().insert(characteristic);
    }

    /// Make future reads of `characteristic` fail at the radio layer
    pub fn fail_reads_on(&self, characteristic: Uuid) {
        self.inner.failing_reads.lock().unwrap().insert(characteristic);
    }

    /// Drop the connection from the device side
    pub async fn inject_disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let _ = self.inner.events.send(LinkEvent::Disconnected).await;
    }

    /// Every operation issued so far, in issue order
    pub fn operations(&self) -> Vec<RecordedOp> {
        self.inner.operations.lock().unwrap().clone()
    }

    /// Reads issued so far, in issue order
    pub fn reads_issued(&self) -> Vec<Uuid> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Read(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Writes issued so far, in issue order
    pub fn writes_issued(&self) -> Vec<Uuid> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Write(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Last payload written to a characteristic
    pub fn last_written(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        self.inner.written.lock().unwrap().get(&characteristic).cloned()
    }

    fn record(&self, op: RecordedOp) {
        self.inner.operations.lock().unwrap().push(op);
    }
}

#[async_trait]
impl GattLink for SimulatedPeripheral {
    fn device_id(&self) -> DeviceId {
        DeviceId::new("sim:00:11:22:33:44:55")
    }

    async fn connect(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        let _ = self.inner.events.send(LinkEvent::Connected).await;
    }

    async fn discover_services(&self) {
        let _ = self
            .inner
            .events
            .send(LinkEvent::ServicesDiscovered {
                services: self.inner.services.clone(),
            })
            .await;
    }

    async fn write_characteristic(&self, characteristic: Uuid, payload: &[u8]) {
        self.record(RecordedOp::Write(characteristic));

        let failing = self
            .inner
            .failing_writes
            .lock()
            .unwrap()
            .contains(&characteristic);
        let status = if failing {
            Err("simulated write failure".to_string())
        } else {
            self.inner
                .written
                .lock()
                .unwrap()
                .insert(characteristic, payload.to_vec());
            Ok(())
        };
        let _ = self
            .inner
            .events
            .send(LinkEvent::WriteCompleted {
                characteristic,
                status,
            })
            .await;
    }

    async fn read_characteristic(&self, characteristic: Uuid) {
        self.record(RecordedOp::Read(characteristic));

        if self
            .inner
            .failing_reads
            .lock()
            .unwrap()
            .contains(&characteristic)
        {
            let _ = self
                .inner
                .events
                .send(LinkEvent::ReadCompleted {
                    characteristic,
                    value: Err("simulated read failure".to_string()),
                })
                .await;
            return;
        }

        let responder = self
            .inner
            .responders
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned()
            .unwrap_or(Responder::Echo);

        let value = match responder {
            Responder::Echo => Ok(self
                .inner
                .written
                .lock()
                .unwrap()
                .get(&characteristic)
                .cloned()
                .unwrap_or_default()),
            Responder::Fixed(payload) => Ok(payload),
            Responder::Silent => return,
        };

        let _ = self
            .inner
            .events
            .send(LinkEvent::ReadCompleted {
                characteristic,
                value,
            })
            .await;
    }

    async fn read_descriptor(&self, characteristic: Uuid, descriptor: Uuid) {
        self.record(RecordedOp::DescriptorRead(characteristic, descriptor));

        let key = (characteristic, descriptor);
        let value = if self.inner.unreadable_descriptors.contains(&key) {
            Err("simulated descriptor read failure".to_string())
        } else {
            match self.inner.descriptor_values.get(&key) {
                Some(value) => Ok(value.clone()),
                None => Err("descriptor has no value".to_string()),
            }
        };
        let _ = self
            .inner
            .events
            .send(LinkEvent::DescriptorRead {
                characteristic,
                descriptor,
                value,
            })
            .await;
    }

    async fn disconnect(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            let _ = self.inner.events.send(LinkEvent::Disconnected).await;
        }
    }
}
