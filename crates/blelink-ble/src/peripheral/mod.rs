//! Local GATT services and advertising, per platform

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use async_trait::async_trait;
use blelink_core::{AdapterResult, AdvertisingParameters, LocalCharacteristicSpec};
use uuid::Uuid;

use crate::config::BackendConfig;

// ----------------------------------------------------------------------------
// Service Handles
// ----------------------------------------------------------------------------

/// Opaque handle to a locally hosted service, owned by the engine until released
#[derive(Debug, PartialEq, Eq)]
pub struct LocalServiceHandle {
    pub(crate) id: u64,
    uuid: Uuid,
}

impl LocalServiceHandle {
    pub(crate) fn new(id: u64, uuid: Uuid) -> Self {
        Self { id, uuid }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

// ----------------------------------------------------------------------------
// Cross-platform GATT Server Trait
// ----------------------------------------------------------------------------

/// Peripheral-role operations of a platform BLE stack
#[async_trait]
pub trait GattServer: Send + Sync {
    /// Register a service with one native characteristic per spec
    async fn create_service(
        &self,
        uuid: Uuid,
        primary: bool,
        characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<LocalServiceHandle>;

    /// Unregister a service, stopping any advertisement it owns
    async fn release_service(&self, service: LocalServiceHandle);

    async fn start_advertising(
        &self,
        service: &LocalServiceHandle,
        parameters: &AdvertisingParameters,
    ) -> AdapterResult<()>;

    async fn stop_advertising(&self, service: &LocalServiceHandle) -> AdapterResult<()>;

    /// Store a new value and notify every subscribed central
    async fn notify_value(
        &self,
        service: &LocalServiceHandle,
        characteristic: Uuid,
        value: &[u8],
    ) -> AdapterResult<()>;
}

// ----------------------------------------------------------------------------
// Platform Detection
// ----------------------------------------------------------------------------

/// GATT server for the current platform
pub enum PlatformServer {
    #[cfg(target_os = "linux")]
    Linux(linux::BluezServer),
    #[allow(dead_code)]
    Fallback(fallback::UnsupportedServer),
}

impl PlatformServer {
    pub fn new(config: &BackendConfig) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::BluezServer::new(config.adapter_index))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = config;
            Self::Fallback(fallback::UnsupportedServer)
        }
    }
}

#[async_trait]
impl GattServer for PlatformServer {
    async fn create_service(
        &self,
        uuid: Uuid,
        primary: bool,
        characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<LocalServiceHandle> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(server) => server.create_service(uuid, primary, characteristics).await,
            Self::Fallback(server) => server.create_service(uuid, primary, characteristics).await,
        }
    }

    async fn release_service(&self, service: LocalServiceHandle) {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(server) => server.release_service(service).await,
            Self::Fallback(server) => server.release_service(service).await,
        }
    }

    async fn start_advertising(
        &self,
        service: &LocalServiceHandle,
        parameters: &AdvertisingParameters,
    ) -> AdapterResult<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(server) => server.start_advertising(service, parameters).await,
            Self::Fallback(server) => server.start_advertising(service, parameters).await,
        }
    }

    async fn stop_advertising(&self, service: &LocalServiceHandle) -> AdapterResult<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(server) => server.stop_advertising(service).await,
            Self::Fallback(server) => server.stop_advertising(service).await,
        }
    }

    async fn notify_value(
        &self,
        service: &LocalServiceHandle,
        characteristic: Uuid,
        value: &[u8],
    ) -> AdapterResult<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(server) => server.notify_value(service, characteristic, value).await,
            Self::Fallback(server) => server.notify_value(service, characteristic, value).await,
        }
    }
}
