//! Peripheral role manager: locally hosted services and advertising

use std::collections::HashMap;

use uuid::Uuid;

use crate::adapter::{AdvertisingParameters, BleAdapter, LocalCharacteristicSpec};
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::session::Session;
use crate::types::{parse_uuid, AttributePermissions, CharacteristicProperties};

// ----------------------------------------------------------------------------
// Local Service Table
// ----------------------------------------------------------------------------

/// A native service provider and what it was created with
#[derive(Debug)]
pub struct LocalService<P> {
    pub provider: P,
    pub primary: bool,
    /// Characteristics attached at creation time
    pub characteristics: Vec<Uuid>,
}

/// Characteristic specs, local services and advertising state
#[derive(Debug)]
pub struct PeripheralRole<P> {
    local_name: Option<String>,
    specs: Vec<LocalCharacteristicSpec>,
    services: HashMap<Uuid, LocalService<P>>,
    advertising: bool,
}

impl<P> Default for PeripheralRole<P> {
    fn default() -> Self {
        Self {
            local_name: None,
            specs: Vec::new(),
            services: HashMap::new(),
            advertising: false,
        }
    }
}

impl<P> PeripheralRole<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_name(&mut self, name: String) {
        self.local_name = (!name.is_empty()).then_some(name);
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Add a spec, replacing one with the same UUID in place
    pub fn define(&mut self, spec: LocalCharacteristicSpec) {
        match self.specs.iter_mut().find(|existing| existing.uuid == spec.uuid) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    pub fn undefine(&mut self, uuid: &Uuid) -> bool {
        let before = self.specs.len();
        self.specs.retain(|spec| &spec.uuid != uuid);
        self.specs.len() != before
    }

    pub fn undefine_all(&mut self) {
        self.specs.clear();
    }

    pub fn specs(&self) -> &[LocalCharacteristicSpec] {
        &self.specs
    }

    pub fn has_service(&self, uuid: &Uuid) -> bool {
        self.services.contains_key(uuid)
    }

    pub fn insert_service(&mut self, uuid: Uuid, service: LocalService<P>) {
        self.services.insert(uuid, service);
    }

    pub fn remove_service(&mut self, uuid: &Uuid) -> Option<LocalService<P>> {
        self.services.remove(uuid)
    }

    pub fn drain_services(&mut self) -> Vec<LocalService<P>> {
        self.services.drain().map(|(_, service)| service).collect()
    }

    pub fn services(&self) -> impl Iterator<Item = (&Uuid, &LocalService<P>)> {
        self.services.iter()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn set_advertising(&mut self, advertising: bool) {
        self.advertising = advertising;
    }
}

fn parse_local_uuid(uuid: &str) -> EngineResult<Uuid> {
    parse_uuid(uuid).ok_or_else(|| EngineError::InvalidCommand(format!("bad UUID {uuid:?}")))
}

// ----------------------------------------------------------------------------
// Peripheral Operations
// ----------------------------------------------------------------------------

impl<A: BleAdapter> Session<A> {
    pub(crate) async fn set_local_name(&self, name: String) -> EngineResult<()> {
        self.peripheral.lock().await.set_local_name(name);
        Ok(())
    }

    pub(crate) async fn define_characteristic(
        &self,
        uuid: &str,
        properties: u32,
        permissions: u32,
        value: Vec<u8>,
    ) -> EngineResult<()> {
        let spec = LocalCharacteristicSpec {
            uuid: parse_local_uuid(uuid)?,
            properties: CharacteristicProperties::from_bits(properties),
            permissions: AttributePermissions::from_bits(permissions),
            value,
        };
        self.peripheral.lock().await.define(spec);
        Ok(())
    }

    pub(crate) async fn undefine_characteristic(&self, uuid: &str) -> EngineResult<()> {
        let uuid = parse_local_uuid(uuid)?;
        if !self.peripheral.lock().await.undefine(&uuid) {
            return Err(EngineError::Precondition(format!("{uuid} is not defined")));
        }
        Ok(())
    }

    pub(crate) async fn undefine_all_characteristics(&self) -> EngineResult<()> {
        self.peripheral.lock().await.undefine_all();
        Ok(())
    }

    /// Create a provider carrying every currently defined characteristic
    pub(crate) async fn create_service(&self, uuid: &str, primary: bool) -> EngineResult<()> {
        let uuid = parse_local_uuid(uuid)?;
        let mut role = self.peripheral.lock().await;
        if role.has_service(&uuid) {
            return Err(EngineError::Precondition(format!("service {uuid} already exists")));
        }

        let specs = role.specs().to_vec();
        let provider = self.adapter.create_service(uuid, primary, &specs).await?;
        if !self.is_open() {
            tracing::debug!("Session closed while creating service {}; releasing", uuid);
            self.adapter.release_service_provider(provider).await;
            return Ok(());
        }
        tracing::info!("Created local service {} with {} characteristic(s)", uuid, specs.len());
        role.insert_service(
            uuid,
            LocalService {
                provider,
                primary,
                characteristics: specs.iter().map(|spec| spec.uuid).collect(),
            },
        );
        Ok(())
    }

    pub(crate) async fn remove_service(&self, uuid: &str) -> EngineResult<()> {
        let uuid = parse_local_uuid(uuid)?;
        let service = self
            .peripheral
            .lock()
            .await
            .remove_service(&uuid)
            .ok_or_else(|| EngineError::Precondition(format!("service {uuid} does not exist")))?;

        let stopped = self.adapter.stop_advertising(&service.provider).await;
        self.adapter.release_service_provider(service.provider).await;
        stopped?;
        Ok(())
    }

    /// Stop all advertising and release every local service
    pub(crate) async fn remove_services(&self) -> EngineResult<()> {
        self.stop_advertising().await?;
        let services = self.peripheral.lock().await.drain_services();
        for service in services {
            self.adapter.release_service_provider(service.provider).await;
        }
        Ok(())
    }

    pub(crate) async fn start_advertising(&self) -> EngineResult<()> {
        let mut role = self.peripheral.lock().await;
        let parameters = AdvertisingParameters {
            discoverable: true,
            connectable: true,
            local_name: role.local_name().map(str::to_string),
        };

        for (uuid, service) in role.services() {
            match self
                .adapter
                .start_advertising(&service.provider, &parameters)
                .await
            {
                Ok(()) => tracing::info!("Advertising local service {}", uuid),
                Err(status) => {
                    tracing::warn!("Failed to advertise {}: {}", uuid, status);
                    self.emit(Event::from(status));
                }
            }
        }
        role.set_advertising(true);
        Ok(())
    }

    pub(crate) async fn stop_advertising(&self) -> EngineResult<()> {
        let mut role = self.peripheral.lock().await;
        for (uuid, service) in role.services() {
            if let Err(status) = self.adapter.stop_advertising(&service.provider).await {
                tracing::warn!("Failed to stop advertising {}: {}", uuid, status);
                self.emit(Event::from(status));
            }
        }
        role.set_advertising(false);
        self.emit(Event::StoppedAdvertising);
        Ok(())
    }

    /// Notify every local characteristic with this UUID, across all services
    pub(crate) async fn push_characteristic_value(
        &self,
        uuid: &str,
        value: Vec<u8>,
    ) -> EngineResult<()> {
        let uuid = parse_local_uuid(uuid)?;
        let role = self.peripheral.lock().await;
        for service in role
            .services()
            .map(|(_, service)| service)
            .filter(|service| service.characteristics.contains(&uuid))
        {
            if let Err(status) = self
                .adapter
                .notify_value(&service.provider, uuid, &value)
                .await
            {
                tracing::warn!("Failed to notify {}: {}", uuid, status);
                self.emit(Event::from(status));
            }
        }
        Ok(())
    }
}
