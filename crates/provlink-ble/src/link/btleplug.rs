//! btleplug backend for the GATT link
//!
//! Wraps one `btleplug::platform::Peripheral`. Each issued operation runs on
//! a spawned task and reports its outcome through the link event channel;
//! the connection task keeps at most one radio operation outstanding, so the
//! event stream stays ordered. Unsolicited disconnects are picked up from
//! the adapter's central event stream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use provlink_core::DeviceId;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::link::{GattCharacteristic, GattLink, GattService, LinkEvent, LinkEventSender};

// ----------------------------------------------------------------------------
// Btleplug Link
// ----------------------------------------------------------------------------

/// Production [`GattLink`] over a btleplug peripheral
#[derive(Clone)]
pub struct BtleplugLink {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Adapter,
    peripheral: Peripheral,
    events: LinkEventSender,
    /// Platform handles captured at discovery, keyed by characteristic uuid
    characteristics: Mutex<HashMap<Uuid, btleplug::api::Characteristic>>,
    descriptors: Mutex<HashMap<(Uuid, Uuid), btleplug::api::Descriptor>>,
}

impl BtleplugLink {
    /// Bind a link to a peripheral obtained from the caller's scan
    pub fn new(adapter: Adapter, peripheral: Peripheral, events: LinkEventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                peripheral,
                events,
                characteristics: Mutex::new(HashMap::new()),
                descriptors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Watch the adapter event stream for unsolicited disconnects
    async fn spawn_disconnect_watcher(&self) {
        let inner = Arc::clone(&self.inner);
        let target = inner.peripheral.id();
        let mut events = match inner.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Adapter event stream unavailable: {}", e);
                return;
            }
        };

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == target {
                        let _ = inner.events.send(LinkEvent::Disconnected).await;
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    fn device_id(&self) -> DeviceId {
        DeviceId::new(self.inner.peripheral.address().to_string())
    }

    async fn connect(&self) {
        self.spawn_disconnect_watcher().await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let event = match inner.peripheral.connect().await {
                Ok(()) => LinkEvent::Connected,
                Err(e) => LinkEvent::LinkFailed {
                    reason: format!("connect failed: {}", e),
                },
            };
            let _ = inner.events.send(event).await;
        });
    }

    async fn discover_services(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.peripheral.discover_services().await {
                let _ = inner
                    .events
                    .send(LinkEvent::LinkFailed {
                        reason: format!("service discovery failed: {}", e),
                    })
                    .await;
                return;
            }

            let mut characteristics = inner.characteristics.lock().await;
            let mut descriptors = inner.descriptors.lock().await;
            let mut services = Vec::new();

            for service in inner.peripheral.services() {
                let mut chars = Vec::new();
                for ch in &service.characteristics {
                    let mut desc_uuids = Vec::new();
                    for desc in &ch.descriptors {
                        desc_uuids.push(desc.uuid);
                        descriptors.insert((ch.uuid, desc.uuid), desc.clone());
                    }
                    characteristics.insert(ch.uuid, ch.clone());
                    chars.push(GattCharacteristic {
                        uuid: ch.uuid,
                        descriptors: desc_uuids,
                    });
                }
                services.push(GattService {
                    uuid: service.uuid,
                    characteristics: chars,
                });
            }
            drop(characteristics);
            drop(descriptors);

            debug!("Discovered {} services", services.len());
            let _ = inner
                .events
                .send(LinkEvent::ServicesDiscovered { services })
                .await;
        });
    }

    async fn write_characteristic(&self, characteristic: Uuid, payload: &[u8]) {
        let inner = Arc::clone(&self.inner);
        let payload = payload.to_vec();
        tokio::spawn(async move {
            let handle = inner.characteristics.lock().await.get(&characteristic).cloned();
            let status = match handle {
                Some(ch) => inner
                    .peripheral
                    .write(&ch, &payload, WriteType::WithResponse)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("characteristic not discovered".to_string()),
            };
            let _ = inner
                .events
                .send(LinkEvent::WriteCompleted {
                    characteristic,
                    status,
                })
                .await;
        });
    }

    async fn read_characteristic(&self, characteristic: Uuid) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let handle = inner.characteristics.lock().await.get(&characteristic).cloned();
            let value = match handle {
                Some(ch) => inner.peripheral.read(&ch).await.map_err(|e| e.to_string()),
                None => Err("characteristic not discovered".to_string()),
            };
            let _ = inner
                .events
                .send(LinkEvent::ReadCompleted {
                    characteristic,
                    value,
                })
                .await;
        });
    }

    async fn read_descriptor(&self, characteristic: Uuid, descriptor: Uuid) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let handle = inner
                .descriptors
                .lock()
                .await
                .get(&(characteristic, descriptor))
                .cloned();
            let value = match handle {
                Some(desc) => inner
                    .peripheral
                    .read_descriptor(&desc)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("descriptor not discovered".to_string()),
            };
            let _ = inner
                .events
                .send(LinkEvent::DescriptorRead {
                    characteristic,
                    descriptor,
                    value,
                })
                .await;
        });
    }

    async fn disconnect(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.peripheral.disconnect().await {
                warn!("Disconnect failed: {}", e);
                // The watcher will not fire; report teardown ourselves
                let _ = inner.events.send(LinkEvent::Disconnected).await;
            }
        });
    }
}
