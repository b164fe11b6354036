//! The native adapter seam
//!
//! The engine never talks to a platform BLE stack directly. Everything native goes
//! through [`BleAdapter`], whose handle types are opaque to the engine and must be
//! handed back through the matching `release_*` call once the engine is done with them.
//! Unsolicited native callbacks arrive as [`AdapterEvent`] values.

use std::collections::BTreeMap;

use async_trait::async_trait;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::AdapterResult;
use crate::types::{AttributePermissions, CharacteristicProperties, DeviceId, WriteType};

// ----------------------------------------------------------------------------
// Native Callbacks
// ----------------------------------------------------------------------------

/// A received advertisement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advertisement {
    pub device: DeviceId,
    /// Local name carried in the advertisement, if any
    pub local_name: Option<String>,
    /// Raw signal strength in dBm, zero when unknown
    pub rssi: i16,
    /// Manufacturer specific data keyed by company identifier
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Service UUIDs listed in the advertisement
    pub services: SmallVec<[Uuid; 4]>,
}

/// Unsolicited events raised by the native stack
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Advertisement(Advertisement),
    /// The stack reports a connected device went away without being asked to
    Disconnected(DeviceId),
    /// A subscribed characteristic pushed a new value
    ValueChanged {
        device: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

// ----------------------------------------------------------------------------
// Peripheral Role Types
// ----------------------------------------------------------------------------

/// A characteristic declared by the host for locally hosted services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCharacteristicSpec {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    /// Value supplied to the native characteristic at creation time
    pub value: Vec<u8>,
}

/// Parameters used when a local service provider starts advertising
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParameters {
    pub discoverable: bool,
    pub connectable: bool,
    pub local_name: Option<String>,
}

/// A device the system already holds a connection to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedDevice {
    pub device: DeviceId,
    pub name: String,
}

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// Native GATT handles expose the UUID they represent
pub trait GattHandle: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;
}

/// Asynchronous native BLE stack, in both central and peripheral roles
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Handle to a connected remote device
    type Device: Clone + Send + Sync + 'static;
    /// Handle to a service of a connected device
    type Service: GattHandle;
    /// Handle to a characteristic; valid while any handle to its service is held
    type Characteristic: GattHandle;
    /// Handle to a locally hosted service
    type ServiceProvider: Send + Sync + 'static;

    /// Start delivering advertisements, restricted to `services` when non-empty
    async fn start_scan(&self, services: &[Uuid]) -> AdapterResult<()>;

    async fn stop_scan(&self) -> AdapterResult<()>;

    /// Look up the display name of a device that advertised without one
    async fn resolve_name(&self, device: &DeviceId) -> Option<String>;

    /// Devices already connected at system level exposing all of `services`
    async fn retrieve_connected(&self, services: &[Uuid]) -> AdapterResult<Vec<RetrievedDevice>>;

    async fn connect(&self, device: &DeviceId) -> AdapterResult<Self::Device>;

    /// Release a device handle; the native link is torn down
    async fn release_device(&self, device: Self::Device);

    /// Whether the native link behind `device` is still up
    async fn is_connected(&self, device: &Self::Device) -> bool;

    /// Enumerate services afresh. Every returned handle must be released.
    async fn services(&self, device: &Self::Device) -> AdapterResult<Vec<Self::Service>>;

    async fn release_service(&self, service: Self::Service);

    async fn characteristics(
        &self,
        service: &Self::Service,
    ) -> AdapterResult<Vec<Self::Characteristic>>;

    async fn read(&self, characteristic: &Self::Characteristic) -> AdapterResult<Vec<u8>>;

    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> AdapterResult<()>;

    /// Write the client configuration descriptor to enable or disable notifications
    async fn set_notify(
        &self,
        characteristic: &Self::Characteristic,
        enabled: bool,
    ) -> AdapterResult<()>;

    /// Create a local service with one native characteristic per spec
    async fn create_service(
        &self,
        uuid: Uuid,
        primary: bool,
        characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<Self::ServiceProvider>;

    async fn release_service_provider(&self, provider: Self::ServiceProvider);

    async fn start_advertising(
        &self,
        provider: &Self::ServiceProvider,
        parameters: &AdvertisingParameters,
    ) -> AdapterResult<()>;

    async fn stop_advertising(&self, provider: &Self::ServiceProvider) -> AdapterResult<()>;

    /// Notify subscribed centrals of a new value for a local characteristic
    async fn notify_value(
        &self,
        provider: &Self::ServiceProvider,
        characteristic: Uuid,
        value: &[u8],
    ) -> AdapterResult<()>;
}
