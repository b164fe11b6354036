//! Peripheral role on platforms without a supported GATT server

use async_trait::async_trait;
use blelink_core::{AdapterResult, AdvertisingParameters, GattStatus, LocalCharacteristicSpec};
use tracing::warn;
use uuid::Uuid;

use super::{GattServer, LocalServiceHandle};

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Rejects every peripheral-role operation with `NotSupported`
#[derive(Debug, Default)]
pub struct UnsupportedServer;

#[async_trait]
impl GattServer for UnsupportedServer {
    async fn create_service(
        &self,
        uuid: Uuid,
        _primary: bool,
        _characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<LocalServiceHandle> {
        warn!(
            "Local GATT services are not supported on this platform; service {} was not created",
            uuid
        );
        Err(GattStatus::NotSupported)
    }

    async fn release_service(&self, _service: LocalServiceHandle) {}

    async fn start_advertising(
        &self,
        _service: &LocalServiceHandle,
        _parameters: &AdvertisingParameters,
    ) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn stop_advertising(&self, _service: &LocalServiceHandle) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn notify_value(
        &self,
        _service: &LocalServiceHandle,
        _characteristic: Uuid,
        _value: &[u8],
    ) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }
}
