//! Native adapter backed by btleplug for the central role
//!
//! [`BleBackend`] implements [`BleAdapter`]. Remote devices, services and characteristics
//! are driven through btleplug; local services and advertising are delegated to the
//! platform [`PlatformServer`]. Native callbacks are pumped into a bounded channel of
//! [`AdapterEvent`]s for the engine to drain.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use blelink_core::{
    AdapterEvent, AdapterResult, Advertisement, AdvertisingParameters, BleAdapter, DeviceId,
    GattHandle, GattStatus, LocalCharacteristicSpec, RetrievedDevice, WriteType,
};
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType as NativeWriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BackendConfig;
use crate::error::{status_from_btleplug, BackendError};
use crate::peripheral::{GattServer, LocalServiceHandle, PlatformServer};

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// A connected remote device
#[derive(Clone)]
pub struct RemoteDevice {
    id: DeviceId,
    peripheral: Peripheral,
}

impl RemoteDevice {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }
}

/// A service of a connected remote device
#[derive(Clone)]
pub struct RemoteService {
    peripheral: Peripheral,
    uuid: Uuid,
    characteristics: Vec<Characteristic>,
}

impl GattHandle for RemoteService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// A characteristic of a connected remote device
#[derive(Clone)]
pub struct RemoteCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl GattHandle for RemoteCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }
}

/// Stable identifier of a device: its address, or the platform id where the
/// address is hidden
fn device_id_from(address: BDAddr, id: &impl Debug) -> DeviceId {
    if address == BDAddr::default() {
        DeviceId::new(format!("{:?}", id))
    } else {
        DeviceId::new(address.to_string())
    }
}

fn device_id(peripheral: &Peripheral) -> DeviceId {
    device_id_from(peripheral.address(), &peripheral.id())
}

fn native_write_type(write_type: WriteType) -> NativeWriteType {
    match write_type {
        WriteType::WithResponse => NativeWriteType::WithResponse,
        WriteType::WithoutResponse => NativeWriteType::WithoutResponse,
    }
}

type KnownPeripherals = Arc<RwLock<HashMap<DeviceId, Peripheral>>>;

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

/// Native BLE stack for the engine, in both roles
pub struct BleBackend {
    adapter: Adapter,
    /// Peripherals seen since startup, by identifier
    known: KnownPeripherals,
    /// Notification pumps of connected devices
    pumps: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    events: mpsc::Sender<AdapterEvent>,
    server: PlatformServer,
    event_pump: JoinHandle<()>,
}

impl BleBackend {
    /// Open the configured host adapter and start pumping its callbacks
    pub async fn new(
        config: &BackendConfig,
    ) -> Result<(Self, mpsc::Receiver<AdapterEvent>), BackendError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BackendError::AdapterNotAvailable)?;
        info!("Using BLE adapter {}", config.adapter_index);

        let (sender, receiver) = mpsc::channel(config.event_buffer_size.max(1));
        let known = KnownPeripherals::default();
        let central_events = adapter.events().await?;
        let event_pump = tokio::spawn(pump_central_events(
            adapter.clone(),
            known.clone(),
            sender.clone(),
            central_events,
        ));

        let backend = Self {
            adapter,
            known,
            pumps: Mutex::new(HashMap::new()),
            events: sender,
            server: PlatformServer::new(config),
            event_pump,
        };
        Ok((backend, receiver))
    }

    /// Find a peripheral by identifier, consulting the adapter if it was never seen
    async fn peripheral(&self, device: &DeviceId) -> AdapterResult<Peripheral> {
        if let Some(peripheral) = self.known.read().await.get(device) {
            return Ok(peripheral.clone());
        }

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| status_from_btleplug(&e))?;
        let peripheral = peripherals
            .into_iter()
            .find(|peripheral| &device_id(peripheral) == device)
            .ok_or(GattStatus::Unreachable)?;
        self.known
            .write()
            .await
            .insert(device.clone(), peripheral.clone());
        Ok(peripheral)
    }

    /// Forward value notifications of a connected device until its stream ends
    async fn start_notification_pump(&self, device: &RemoteDevice) -> AdapterResult<()> {
        let mut notifications = device
            .peripheral
            .notifications()
            .await
            .map_err(|e| status_from_btleplug(&e))?;
        let peripheral = device.peripheral.clone();
        let id = device.id.clone();
        let events = self.events.clone();

        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let service = peripheral
                    .characteristics()
                    .into_iter()
                    .find(|characteristic| characteristic.uuid == notification.uuid)
                    .map(|characteristic| characteristic.service_uuid);
                let Some(service) = service else {
                    debug!("Notification for unknown characteristic {}", notification.uuid);
                    continue;
                };

                let event = AdapterEvent::ValueChanged {
                    device: id.clone(),
                    service,
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Notification pump for {} ended", id);
        });

        if let Some(previous) = self.pumps.lock().await.insert(device.id.clone(), pump) {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for BleBackend {
    fn drop(&mut self) {
        self.event_pump.abort();
    }
}

/// Translate adapter-level callbacks into engine events
async fn pump_central_events(
    adapter: Adapter,
    known: KnownPeripherals,
    events: mpsc::Sender<AdapterEvent>,
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
) {
    while let Some(event) = central_events.next().await {
        let event = match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                advertisement(&adapter, &known, &id).await.map(AdapterEvent::Advertisement)
            }
            CentralEvent::DeviceDisconnected(id) => adapter
                .peripheral(&id)
                .await
                .ok()
                .map(|peripheral| AdapterEvent::Disconnected(device_id(&peripheral))),
            _ => None,
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
    info!("BLE adapter event stream ended");
}

/// Snapshot the advertisement state of a peripheral and remember it
async fn advertisement(
    adapter: &Adapter,
    known: &KnownPeripherals,
    id: &PeripheralId,
) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let device = device_id(&peripheral);
    known.write().await.insert(device.clone(), peripheral);

    Some(Advertisement {
        device,
        local_name: properties.local_name,
        rssi: properties.rssi.unwrap_or(0),
        manufacturer_data: properties.manufacturer_data.into_iter().collect::<BTreeMap<_, _>>(),
        services: properties.services.into_iter().collect(),
    })
}

// ----------------------------------------------------------------------------
// Adapter Implementation
// ----------------------------------------------------------------------------

#[async_trait]
impl BleAdapter for BleBackend {
    type Device = RemoteDevice;
    type Service = RemoteService;
    type Characteristic = RemoteCharacteristic;
    type ServiceProvider = LocalServiceHandle;

    async fn start_scan(&self, services: &[Uuid]) -> AdapterResult<()> {
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        self.adapter
            .start_scan(filter)
            .await
            .map_err(|e| status_from_btleplug(&e))?;
        info!("Started BLE scanning ({} service filters)", services.len());
        Ok(())
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| status_from_btleplug(&e))?;
        info!("Stopped BLE scanning");
        Ok(())
    }

    async fn resolve_name(&self, device: &DeviceId) -> Option<String> {
        let peripheral = self.known.read().await.get(device).cloned()?;
        peripheral.properties().await.ok()??.local_name
    }

    async fn retrieve_connected(&self, services: &[Uuid]) -> AdapterResult<Vec<RetrievedDevice>> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| status_from_btleplug(&e))?;

        let mut retrieved = Vec::new();
        for peripheral in peripherals {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            let exposed: Vec<Uuid> = peripheral
                .services()
                .iter()
                .map(|service| service.uuid)
                .chain(properties.services.iter().copied())
                .collect();
            if !services.iter().all(|wanted| exposed.contains(wanted)) {
                continue;
            }

            let device = device_id(&peripheral);
            self.known.write().await.insert(device.clone(), peripheral);
            retrieved.push(RetrievedDevice {
                device,
                name: properties.local_name.unwrap_or_default(),
            });
        }
        Ok(retrieved)
    }

    async fn connect(&self, device: &DeviceId) -> AdapterResult<RemoteDevice> {
        let peripheral = self.peripheral(device).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| status_from_btleplug(&e))?;

        let remote = RemoteDevice {
            id: device.clone(),
            peripheral,
        };
        self.start_notification_pump(&remote).await?;
        info!("Connected to {}", device);
        Ok(remote)
    }

    async fn release_device(&self, device: RemoteDevice) {
        if let Some(pump) = self.pumps.lock().await.remove(&device.id) {
            pump.abort();
        }
        if let Err(e) = device.peripheral.disconnect().await {
            warn!("Failed to disconnect from {}: {}", device.id, e);
        }
        info!("Released {}", device.id);
    }

    async fn is_connected(&self, device: &RemoteDevice) -> bool {
        device.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn services(&self, device: &RemoteDevice) -> AdapterResult<Vec<RemoteService>> {
        device
            .peripheral
            .discover_services()
            .await
            .map_err(|e| status_from_btleplug(&e))?;

        Ok(device
            .peripheral
            .services()
            .into_iter()
            .map(|service| RemoteService {
                peripheral: device.peripheral.clone(),
                uuid: service.uuid,
                characteristics: service.characteristics.into_iter().collect(),
            })
            .collect())
    }

    async fn release_service(&self, _service: RemoteService) {
        // btleplug services are plain values
    }

    async fn characteristics(
        &self,
        service: &RemoteService,
    ) -> AdapterResult<Vec<RemoteCharacteristic>> {
        Ok(service
            .characteristics
            .iter()
            .map(|characteristic| RemoteCharacteristic {
                peripheral: service.peripheral.clone(),
                characteristic: characteristic.clone(),
            })
            .collect())
    }

    async fn read(&self, characteristic: &RemoteCharacteristic) -> AdapterResult<Vec<u8>> {
        characteristic
            .peripheral
            .read(&characteristic.characteristic)
            .await
            .map_err(|e| status_from_btleplug(&e))
    }

    async fn write(
        &self,
        characteristic: &RemoteCharacteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> AdapterResult<()> {
        characteristic
            .peripheral
            .write(&characteristic.characteristic, value, native_write_type(write_type))
            .await
            .map_err(|e| status_from_btleplug(&e))?;
        debug!(
            "Wrote {} bytes to {}",
            value.len(),
            characteristic.characteristic.uuid
        );
        Ok(())
    }

    async fn set_notify(
        &self,
        characteristic: &RemoteCharacteristic,
        enabled: bool,
    ) -> AdapterResult<()> {
        let result = if enabled {
            characteristic
                .peripheral
                .subscribe(&characteristic.characteristic)
                .await
        } else {
            characteristic
                .peripheral
                .unsubscribe(&characteristic.characteristic)
                .await
        };
        result.map_err(|e| status_from_btleplug(&e))
    }

    async fn create_service(
        &self,
        uuid: Uuid,
        primary: bool,
        characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<LocalServiceHandle> {
        self.server
            .create_service(uuid, primary, characteristics)
            .await
    }

    async fn release_service_provider(&self, provider: LocalServiceHandle) {
        self.server.release_service(provider).await;
    }

    async fn start_advertising(
        &self,
        provider: &LocalServiceHandle,
        parameters: &AdvertisingParameters,
    ) -> AdapterResult<()> {
        self.server.start_advertising(provider, parameters).await
    }

    async fn stop_advertising(&self, provider: &LocalServiceHandle) -> AdapterResult<()> {
        self.server.stop_advertising(provider).await
    }

    async fn notify_value(
        &self,
        provider: &LocalServiceHandle,
        characteristic: Uuid,
        value: &[u8],
    ) -> AdapterResult<()> {
        self.server
            .notify_value(provider, characteristic, value)
            .await
    }
}
