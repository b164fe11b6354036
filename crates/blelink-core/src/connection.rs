//! Connection manager: registry of connected devices, connect/disconnect and enumeration

use std::collections::HashMap;

use crate::adapter::{BleAdapter, GattHandle};
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::session::Session;
use crate::types::DeviceId;

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// A live connection
#[derive(Debug, Clone)]
pub struct ConnectedDevice<D> {
    pub handle: D,
    /// Display name the device was connected under
    pub name: String,
    /// Distinguishes this connection from earlier ones to the same identifier
    pub epoch: u64,
}

/// Connected devices keyed by identifier
#[derive(Debug)]
pub struct ConnectionRegistry<D> {
    devices: HashMap<DeviceId, ConnectedDevice<D>>,
    next_epoch: u64,
}

impl<D> Default for ConnectionRegistry<D> {
    fn default() -> Self {
        Self {
            devices: HashMap::new(),
            next_epoch: 1,
        }
    }
}

impl<D: Clone> ConnectionRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its epoch. The identifier must not be registered.
    pub fn insert(&mut self, device: DeviceId, handle: D, name: String) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.devices.insert(device, ConnectedDevice { handle, name, epoch });
        epoch
    }

    pub fn get(&self, device: &DeviceId) -> Option<&ConnectedDevice<D>> {
        self.devices.get(device)
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.devices.contains_key(device)
    }

    /// Whether the connection made at `epoch` is still the live one
    pub fn is_live(&self, device: &DeviceId, epoch: u64) -> bool {
        self.devices
            .get(device)
            .is_some_and(|connected| connected.epoch == epoch)
    }

    pub fn remove(&mut self, device: &DeviceId) -> Option<ConnectedDevice<D>> {
        self.devices.remove(device)
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Connection Operations
// ----------------------------------------------------------------------------

impl<A: BleAdapter> Session<A> {
    /// Handle and epoch of a connected device
    pub(crate) async fn connected_handle(&self, device: &DeviceId) -> EngineResult<(A::Device, u64)> {
        let registry = self.registry.read().await;
        let connected = registry
            .get(device)
            .ok_or_else(|| EngineError::Precondition(format!("{device} is not connected")))?;
        Ok((connected.handle.clone(), connected.epoch))
    }

    pub(crate) async fn is_live(&self, device: &DeviceId, epoch: u64) -> bool {
        self.registry.read().await.is_live(device, epoch)
    }

    /// Emit an event only while the connection it belongs to is live
    async fn emit_if_live(&self, device: &DeviceId, epoch: u64, event: Event) -> bool {
        let registry = self.registry.read().await;
        if !registry.is_live(device, epoch) {
            return false;
        }
        self.emit(event);
        true
    }

    pub(crate) async fn connect(&self, device: DeviceId) -> EngineResult<()> {
        let name = self
            .discovery
            .lock()
            .await
            .record(&device)
            .map(|record| record.name.clone())
            .ok_or_else(|| EngineError::Precondition(format!("{device} was never discovered")))?;

        if self.registry.read().await.contains(&device) {
            return Err(EngineError::Precondition(format!("{device} is already connected")));
        }

        tracing::info!("Connecting to {} ({})", name, device);
        let handle = self
            .timed(self.config.connection_timeout, self.adapter.connect(&device))
            .await
            .map_err(|status| {
                tracing::warn!("Connection to {} failed: {}", device, status);
                status
            })?;

        let epoch = {
            let mut registry = self.registry.write().await;
            if !self.is_open() {
                drop(registry);
                tracing::debug!("Session closed while connecting to {}; releasing", device);
                self.adapter.release_device(handle).await;
                return Ok(());
            }
            let epoch = registry.insert(device.clone(), handle.clone(), name.clone());
            self.emit(Event::ConnectedPeripheral { name: name.clone() });
            epoch
        };

        self.enumerate(&device, &handle, &name, epoch).await
    }

    /// Report every service and characteristic of a fresh connection, in discovery order
    async fn enumerate(
        &self,
        device: &DeviceId,
        handle: &A::Device,
        name: &str,
        epoch: u64,
    ) -> EngineResult<()> {
        let services = self
            .timed(self.config.gatt_timeout, self.adapter.services(handle))
            .await?;

        let mut pending = services.into_iter();
        while let Some(service) = pending.next() {
            let service_uuid = service.uuid();
            let announced = self
                .emit_if_live(
                    device,
                    epoch,
                    Event::DiscoveredService {
                        name: name.to_string(),
                        service: service_uuid,
                    },
                )
                .await;
            if !announced {
                tracing::debug!("{} went away during enumeration", device);
                self.release_services(std::iter::once(service).chain(pending)).await;
                return Ok(());
            }

            let characteristics = self
                .timed(self.config.gatt_timeout, self.adapter.characteristics(&service))
                .await;
            self.adapter.release_service(service).await;

            let characteristics = match characteristics {
                Ok(characteristics) => characteristics,
                Err(status) => {
                    self.release_services(pending).await;
                    if !self.is_live(device, epoch).await {
                        return Ok(());
                    }
                    return Err(status.into());
                }
            };

            for characteristic in characteristics {
                let event = Event::DiscoveredCharacteristic {
                    name: name.to_string(),
                    service: service_uuid,
                    characteristic: characteristic.uuid(),
                };
                if !self.emit_if_live(device, epoch, event).await {
                    self.release_services(pending).await;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn release_services(&self, services: impl IntoIterator<Item = A::Service>) {
        for service in services {
            self.adapter.release_service(service).await;
        }
    }

    /// Tear down a connection: registry entry, cached GATT handles, native device.
    ///
    /// Shared by explicit disconnects and unsolicited ones reported by the adapter;
    /// whichever runs first emits the single `DisconnectedPeripheral`.
    pub(crate) async fn disconnect(&self, device: DeviceId) -> EngineResult<()> {
        let (connected, released) = {
            let mut registry = self.registry.write().await;
            let connected = registry
                .remove(&device)
                .ok_or_else(|| EngineError::Precondition(format!("{device} is not connected")))?;
            let released = self.cache.lock().await.drain_device(&device);
            (connected, released)
        };

        self.release_services(released).await;
        self.adapter.release_device(connected.handle).await;
        tracing::info!("Disconnected from {} ({})", connected.name, device);
        self.emit(Event::DisconnectedPeripheral { device });
        Ok(())
    }

    pub(crate) async fn disconnect_all(&self) -> EngineResult<()> {
        let devices = self.registry.read().await.ids();
        for device in devices {
            if let Err(e) = self.disconnect(device).await {
                tracing::debug!("Skipping disconnect: {}", e);
            }
        }
        Ok(())
    }
}
