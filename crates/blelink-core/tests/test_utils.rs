//! Test utilities for deterministic testing of the engine
//!
//! [`MockAdapter`] is an in-memory BLE stack. It tracks every native handle it hands
//! out so tests can assert that nothing leaks, can be told to fail specific calls, and
//! can hold a call at a gate so tests can interleave work deterministically.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blelink_core::{
    AdapterEvent, AdapterResult, Advertisement, AdvertisingParameters, BleAdapter, Command,
    Engine, EngineConfig, Event, GattHandle, GattStatus, LocalCharacteristicSpec,
    RetrievedDevice, WriteType,
};
use blelink_core::{parse_uuid, DeviceId};
use tokio::sync::{mpsc, Notify, Semaphore};
use uuid::Uuid;

/// Expand a 16-bit UUID
pub fn short(uuid: u16) -> Uuid {
    parse_uuid(&format!("{uuid:04X}")).unwrap()
}

pub const HEART_RATE: u16 = 0x180D;
pub const BATTERY: u16 = 0x180F;
pub const HEART_RATE_MEASUREMENT: u16 = 0x2A37;
pub const BODY_SENSOR_LOCATION: u16 = 0x2A38;
pub const CONTROL_POINT: u16 = 0x2A39;
pub const BATTERY_LEVEL: u16 = 0x2A19;

// ----------------------------------------------------------------------------
// Mock Handles
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockDevice {
    pub id: u64,
    pub device: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockService {
    pub id: u64,
    pub device: DeviceId,
    pub uuid: Uuid,
}

impl GattHandle for MockService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockCharacteristic {
    pub device: DeviceId,
    pub service: Uuid,
    pub uuid: Uuid,
}

impl GattHandle for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[derive(Debug)]
pub struct MockProvider {
    pub id: u64,
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

// ----------------------------------------------------------------------------
// Failure Injection and Gates
// ----------------------------------------------------------------------------

/// Native calls that can be failed or held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    StartScan,
    StopScan,
    Retrieve,
    Connect,
    Services,
    Characteristics,
    Read,
    Write,
    EnableNotify,
    DisableNotify,
    CreateService,
    StartAdvertising,
    StopAdvertising,
    NotifyValue,
}

/// Holds calls until opened
#[derive(Debug)]
pub struct Gate {
    permits: Semaphore,
    entered: AtomicUsize,
    arrived: Notify,
}

impl Gate {
    fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
            entered: AtomicUsize::new(0),
            arrived: Notify::new(),
        }
    }

    async fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_waiters();
        if let Ok(permit) = self.permits.acquire().await {
            drop(permit);
        }
    }

    /// Wait until `count` calls are blocked at (or have passed) the gate
    pub async fn wait_entered(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.arrived.notified();
                if self.entered.load(Ordering::SeqCst) >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("call never reached the gate");
    }

    /// Let every held and future call through
    pub fn open(&self) {
        self.permits.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

// ----------------------------------------------------------------------------
// Mock Adapter
// ----------------------------------------------------------------------------

/// A remote device known to the mock stack
#[derive(Debug, Clone, Default)]
pub struct MockPeripheral {
    pub name: Option<String>,
    /// Services in discovery order, each with its characteristics in order
    pub services: Vec<(Uuid, Vec<Uuid>)>,
    /// Reported by `retrieve_connected`
    pub system_connected: bool,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub peripherals: HashMap<DeviceId, MockPeripheral>,
    pub live_devices: HashSet<u64>,
    pub live_services: HashSet<u64>,
    pub live_providers: HashSet<u64>,
    pub advertising: HashSet<u64>,
    pub advertising_names: Vec<Option<String>>,
    pub values: HashMap<(DeviceId, Uuid, Uuid), Vec<u8>>,
    pub writes: Vec<(DeviceId, Uuid, Vec<u8>, WriteType)>,
    pub notifying: HashSet<(DeviceId, Uuid, Uuid)>,
    pub local_notifications: Vec<(Uuid, Uuid, Vec<u8>)>,
    pub created_services: Vec<(Uuid, bool, Vec<LocalCharacteristicSpec>)>,
    pub scanning: bool,
    pub scan_filter: Vec<Uuid>,
    /// Devices whose native link went down without the engine asking
    pub lost_links: HashSet<DeviceId>,
    pub failures: HashMap<MockCall, GattStatus>,
    pub calls: Vec<MockCall>,
    next_handle: u64,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// In-memory BLE stack with handle accounting
#[derive(Debug, Default)]
pub struct MockAdapter {
    state: Mutex<MockState>,
    gates: Mutex<HashMap<MockCall, Arc<Gate>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a remote device with the given services
    pub fn add_peripheral(&self, device: &str, name: Option<&str>, services: &[(u16, &[u16])]) {
        let services = services
            .iter()
            .map(|(service, characteristics)| {
                (
                    short(*service),
                    characteristics.iter().copied().map(short).collect(),
                )
            })
            .collect();
        self.state.lock().unwrap().peripherals.insert(
            device.into(),
            MockPeripheral {
                name: name.map(str::to_string),
                services,
                system_connected: false,
            },
        );
    }

    /// Drop the native link of `device` and return the callback the stack would raise
    pub fn drop_link(&self, device: &str) -> AdapterEvent {
        self.state.lock().unwrap().lost_links.insert(device.into());
        AdapterEvent::Disconnected(device.into())
    }

    pub fn set_system_connected(&self, device: &str) {
        if let Some(peripheral) = self.state.lock().unwrap().peripherals.get_mut(&device.into()) {
            peripheral.system_connected = true;
        }
    }

    pub fn set_value(&self, device: &str, service: u16, characteristic: u16, value: &[u8]) {
        self.state.lock().unwrap().values.insert(
            (device.into(), short(service), short(characteristic)),
            value.to_vec(),
        );
    }

    pub fn fail(&self, call: MockCall, status: GattStatus) {
        self.state.lock().unwrap().failures.insert(call, status);
    }

    pub fn succeed(&self, call: MockCall) {
        self.state.lock().unwrap().failures.remove(&call);
    }

    /// Hold every subsequent `call` until the returned gate is opened
    pub fn hold(&self, call: MockCall) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.gates.lock().unwrap().insert(call, gate.clone());
        gate
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn live_services(&self) -> usize {
        self.state().live_services.len()
    }

    pub fn live_devices(&self) -> usize {
        self.state().live_devices.len()
    }

    pub fn live_providers(&self) -> usize {
        self.state().live_providers.len()
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn is_notifying(&self, device: &str, service: u16, characteristic: u16) -> bool {
        self.state()
            .notifying
            .contains(&(device.into(), short(service), short(characteristic)))
    }

    /// Record the call, honour any gate, then apply any injected failure
    async fn enter(&self, call: MockCall) -> AdapterResult<()> {
        let gate = self.gates.lock().unwrap().get(&call).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.get(&call) {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    type Device = MockDevice;
    type Service = MockService;
    type Characteristic = MockCharacteristic;
    type ServiceProvider = MockProvider;

    async fn start_scan(&self, services: &[Uuid]) -> AdapterResult<()> {
        self.enter(MockCall::StartScan).await?;
        let mut state = self.state();
        state.scanning = true;
        state.scan_filter = services.to_vec();
        Ok(())
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        self.enter(MockCall::StopScan).await?;
        self.state().scanning = false;
        Ok(())
    }

    async fn resolve_name(&self, device: &DeviceId) -> Option<String> {
        self.state()
            .peripherals
            .get(device)
            .and_then(|peripheral| peripheral.name.clone())
    }

    async fn retrieve_connected(&self, services: &[Uuid]) -> AdapterResult<Vec<RetrievedDevice>> {
        self.enter(MockCall::Retrieve).await?;
        let state = self.state();
        let mut devices: Vec<RetrievedDevice> = state
            .peripherals
            .iter()
            .filter(|(_, peripheral)| peripheral.system_connected)
            .filter(|(_, peripheral)| {
                services
                    .iter()
                    .all(|wanted| peripheral.services.iter().any(|(uuid, _)| uuid == wanted))
            })
            .map(|(device, peripheral)| RetrievedDevice {
                device: device.clone(),
                name: peripheral.name.clone().unwrap_or_default(),
            })
            .collect();
        devices.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(devices)
    }

    async fn connect(&self, device: &DeviceId) -> AdapterResult<MockDevice> {
        self.enter(MockCall::Connect).await?;
        let mut state = self.state();
        if !state.peripherals.contains_key(device) {
            return Err(GattStatus::Unreachable);
        }
        let id = state.handle();
        state.live_devices.insert(id);
        state.lost_links.remove(device);
        Ok(MockDevice {
            id,
            device: device.clone(),
        })
    }

    async fn release_device(&self, device: MockDevice) {
        let released = self.state().live_devices.remove(&device.id);
        assert!(released, "device handle {} released twice", device.id);
    }

    async fn is_connected(&self, device: &MockDevice) -> bool {
        let state = self.state();
        state.live_devices.contains(&device.id) && !state.lost_links.contains(&device.device)
    }

    async fn services(&self, device: &MockDevice) -> AdapterResult<Vec<MockService>> {
        self.enter(MockCall::Services).await?;
        let mut state = self.state();
        let uuids: Vec<Uuid> = state
            .peripherals
            .get(&device.device)
            .map(|peripheral| peripheral.services.iter().map(|(uuid, _)| *uuid).collect())
            .unwrap_or_default();
        Ok(uuids
            .into_iter()
            .map(|uuid| {
                let id = state.handle();
                state.live_services.insert(id);
                MockService {
                    id,
                    device: device.device.clone(),
                    uuid,
                }
            })
            .collect())
    }

    async fn release_service(&self, service: MockService) {
        let released = self.state().live_services.remove(&service.id);
        assert!(released, "service handle {} released twice", service.id);
    }

    async fn characteristics(&self, service: &MockService) -> AdapterResult<Vec<MockCharacteristic>> {
        self.enter(MockCall::Characteristics).await?;
        let state = self.state();
        assert!(
            state.live_services.contains(&service.id),
            "characteristics listed on released service {}",
            service.id
        );
        let characteristics = state
            .peripherals
            .get(&service.device)
            .and_then(|peripheral| {
                peripheral
                    .services
                    .iter()
                    .find(|(uuid, _)| *uuid == service.uuid)
            })
            .map(|(_, characteristics)| characteristics.clone())
            .unwrap_or_default();
        Ok(characteristics
            .into_iter()
            .map(|uuid| MockCharacteristic {
                device: service.device.clone(),
                service: service.uuid,
                uuid,
            })
            .collect())
    }

    async fn read(&self, characteristic: &MockCharacteristic) -> AdapterResult<Vec<u8>> {
        self.enter(MockCall::Read).await?;
        Ok(self
            .state()
            .values
            .get(&(
                characteristic.device.clone(),
                characteristic.service,
                characteristic.uuid,
            ))
            .cloned()
            .unwrap_or_default())
    }

    async fn write(
        &self,
        characteristic: &MockCharacteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> AdapterResult<()> {
        self.enter(MockCall::Write).await?;
        self.state().writes.push((
            characteristic.device.clone(),
            characteristic.uuid,
            value.to_vec(),
            write_type,
        ));
        Ok(())
    }

    async fn set_notify(&self, characteristic: &MockCharacteristic, enabled: bool) -> AdapterResult<()> {
        let call = if enabled {
            MockCall::EnableNotify
        } else {
            MockCall::DisableNotify
        };
        self.enter(call).await?;
        let key = (
            characteristic.device.clone(),
            characteristic.service,
            characteristic.uuid,
        );
        let mut state = self.state();
        if enabled {
            state.notifying.insert(key);
        } else {
            state.notifying.remove(&key);
        }
        Ok(())
    }

    async fn create_service(
        &self,
        uuid: Uuid,
        primary: bool,
        characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<MockProvider> {
        self.enter(MockCall::CreateService).await?;
        let mut state = self.state();
        let id = state.handle();
        state.live_providers.insert(id);
        state
            .created_services
            .push((uuid, primary, characteristics.to_vec()));
        Ok(MockProvider {
            id,
            uuid,
            characteristics: characteristics.iter().map(|spec| spec.uuid).collect(),
        })
    }

    async fn release_service_provider(&self, provider: MockProvider) {
        let mut state = self.state();
        state.advertising.remove(&provider.id);
        let released = state.live_providers.remove(&provider.id);
        assert!(released, "provider {} released twice", provider.id);
    }

    async fn start_advertising(
        &self,
        provider: &MockProvider,
        parameters: &AdvertisingParameters,
    ) -> AdapterResult<()> {
        self.enter(MockCall::StartAdvertising).await?;
        assert!(parameters.discoverable && parameters.connectable);
        let mut state = self.state();
        state.advertising.insert(provider.id);
        state.advertising_names.push(parameters.local_name.clone());
        Ok(())
    }

    async fn stop_advertising(&self, provider: &MockProvider) -> AdapterResult<()> {
        self.enter(MockCall::StopAdvertising).await?;
        self.state().advertising.remove(&provider.id);
        Ok(())
    }

    async fn notify_value(
        &self,
        provider: &MockProvider,
        characteristic: Uuid,
        value: &[u8],
    ) -> AdapterResult<()> {
        self.enter(MockCall::NotifyValue).await?;
        assert!(provider.characteristics.contains(&characteristic));
        self.state()
            .local_notifications
            .push((provider.uuid, characteristic, value.to_vec()));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Adapter Events
// ----------------------------------------------------------------------------

pub fn advertisement(device: &str, name: Option<&str>, rssi: i16) -> AdapterEvent {
    AdapterEvent::Advertisement(Advertisement {
        device: device.into(),
        local_name: name.map(str::to_string),
        rssi,
        manufacturer_data: BTreeMap::new(),
        services: Default::default(),
    })
}

pub fn value_changed(device: &str, service: u16, characteristic: u16, value: &[u8]) -> AdapterEvent {
    AdapterEvent::ValueChanged {
        device: device.into(),
        service: short(service),
        characteristic: short(characteristic),
        value: value.to_vec(),
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// An engine over a [`MockAdapter`] with its event stream
pub struct Harness {
    pub engine: Engine<MockAdapter>,
    pub adapter: Arc<MockAdapter>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(
            EngineConfig::new()
                .with_connection_timeout(Duration::from_millis(500))
                .with_gatt_timeout(Duration::from_millis(500))
                .with_name_resolution_timeout(Duration::from_millis(100)),
        )
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let adapter = Arc::new(MockAdapter::new());
        let (engine, events) = Engine::new(adapter.clone(), config);
        Self {
            engine,
            adapter,
            events,
        }
    }

    /// A harness initialized in both roles, with `Initialized` consumed
    pub async fn initialized() -> Self {
        let mut harness = Self::new();
        harness
            .run(Command::Initialize {
                as_central: true,
                as_peripheral: true,
            })
            .await;
        assert_eq!(harness.drain(), vec!["Initialized"]);
        harness
    }

    /// Decode a JSON command, dispatch it and wait for it to finish
    pub async fn send(&self, json: &str) {
        self.run(Command::decode(json).expect("test command must decode"))
            .await;
    }

    pub async fn run(&self, command: Command) {
        self.engine.dispatch(command);
        self.engine.wait_idle().await;
    }

    pub async fn deliver(&self, event: AdapterEvent) {
        self.engine.handle_adapter_event(event);
        self.engine.wait_idle().await;
    }

    /// Every event emitted so far, encoded
    pub fn drain(&mut self) -> Vec<String> {
        let mut encoded = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            encoded.push(event.encode());
        }
        encoded
    }

    /// Make `device` known to the engine by delivering an advertisement under a scan
    pub async fn discover(&mut self, device: &str, name: &str) {
        self.send(r#"{"command":"ScanForPeripheralsWithServices","allowDuplicates":true}"#)
            .await;
        self.deliver(advertisement(device, Some(name), -50)).await;
        self.drain();
    }

    /// Discover and connect, discarding the resulting events
    pub async fn connect(&mut self, device: &str, name: &str) {
        self.discover(device, name).await;
        self.send(&format!(r#"{{"command":"ConnectToPeripheral","name":"{device}"}}"#))
            .await;
        self.drain();
    }
}

/// JSON for a characteristic command
pub fn characteristic_command(kind: &str, device: &str, service: u16, characteristic: u16) -> String {
    format!(
        r#"{{"command":"{kind}","name":"{device}","service":"{service:04X}","characteristic":"{characteristic:04X}"}}"#
    )
}

pub fn uuid_string(uuid: u16) -> String {
    short(uuid).to_string()
}
