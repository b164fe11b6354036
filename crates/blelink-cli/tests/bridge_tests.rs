//! Tests for the bridge between command input, engine and event output

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use blelink_cli::app::{bridge, spawn_writer};
use blelink_cli::CliError;
use blelink_core::{
    AdapterResult, AdvertisingParameters, BleAdapter, DeviceId, Engine, EngineConfig, GattHandle,
    GattStatus, LocalCharacteristicSpec, RetrievedDevice, WriteType,
};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle type for an adapter that never hands any out
#[derive(Debug, Clone)]
struct NoHandle;

impl GattHandle for NoHandle {
    fn uuid(&self) -> Uuid {
        Uuid::nil()
    }
}

/// Stack without a radio: every native call fails with `NotSupported`
struct NoRadio;

#[async_trait]
impl BleAdapter for NoRadio {
    type Device = NoHandle;
    type Service = NoHandle;
    type Characteristic = NoHandle;
    type ServiceProvider = NoHandle;

    async fn start_scan(&self, _services: &[Uuid]) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn resolve_name(&self, _device: &DeviceId) -> Option<String> {
        None
    }

    async fn retrieve_connected(&self, _services: &[Uuid]) -> AdapterResult<Vec<RetrievedDevice>> {
        Err(GattStatus::NotSupported)
    }

    async fn connect(&self, _device: &DeviceId) -> AdapterResult<NoHandle> {
        Err(GattStatus::NotSupported)
    }

    async fn release_device(&self, _device: NoHandle) {}

    async fn is_connected(&self, _device: &NoHandle) -> bool {
        false
    }

    async fn services(&self, _device: &NoHandle) -> AdapterResult<Vec<NoHandle>> {
        Err(GattStatus::NotSupported)
    }

    async fn release_service(&self, _service: NoHandle) {}

    async fn characteristics(&self, _service: &NoHandle) -> AdapterResult<Vec<NoHandle>> {
        Err(GattStatus::NotSupported)
    }

    async fn read(&self, _characteristic: &NoHandle) -> AdapterResult<Vec<u8>> {
        Err(GattStatus::NotSupported)
    }

    async fn write(
        &self,
        _characteristic: &NoHandle,
        _value: &[u8],
        _write_type: WriteType,
    ) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn set_notify(&self, _characteristic: &NoHandle, _enabled: bool) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn create_service(
        &self,
        _uuid: Uuid,
        _primary: bool,
        _characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<NoHandle> {
        Err(GattStatus::NotSupported)
    }

    async fn release_service_provider(&self, _provider: NoHandle) {}

    async fn start_advertising(
        &self,
        _provider: &NoHandle,
        _parameters: &AdvertisingParameters,
    ) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn stop_advertising(&self, _provider: &NoHandle) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }

    async fn notify_value(
        &self,
        _provider: &NoHandle,
        _characteristic: Uuid,
        _value: &[u8],
    ) -> AdapterResult<()> {
        Err(GattStatus::NotSupported)
    }
}

async fn run_bridge<R>(input: R) -> (Result<(), CliError>, String)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let (engine, events) = Engine::new(Arc::new(NoRadio), EngineConfig::default());
    let (output, mut host) = tokio::io::duplex(4096);
    let writer = spawn_writer(output, events);
    let (_adapter_tx, adapter_events) = mpsc::channel(1);

    let result = bridge(engine, adapter_events, BufReader::new(input), writer).await;
    let mut written = String::new();
    host.read_to_string(&mut written).await.unwrap();
    (result, written)
}

#[tokio::test]
async fn test_input_end_deinitializes_and_flushes() {
    let input = concat!(
        r#"{"command":"Initialize","asCentral":true,"asPeripheral":true}"#,
        "\n"
    );

    let (result, written) = run_bridge(input.as_bytes()).await;
    assert!(result.is_ok());
    assert_eq!(written, "Initialized\nStoppedAdvertising\nDeInitialized\n");
}

#[tokio::test]
async fn test_input_failure_still_flushes_teardown() {
    let input = tokio_test::io::Builder::new()
        .read(b"{\"command\":\"Initialize\",\"asCentral\":true,\"asPeripheral\":true}\n")
        .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "host went away"))
        .build();

    let (result, written) = run_bridge(input).await;
    assert!(matches!(result, Err(CliError::Io(_))));
    assert_eq!(written, "Initialized\nStoppedAdvertising\nDeInitialized\n");
}
