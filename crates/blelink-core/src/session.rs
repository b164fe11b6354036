//! Session state and command handling
//!
//! A [`Session`] owns every piece of mutable engine state between `Initialize` and
//! `DeInitialize`. Component operations are implemented as `impl Session` blocks in
//! their own modules; this module holds the shared helpers and the exhaustive command
//! routing.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::adapter::{AdapterEvent, BleAdapter};
use crate::command::{characteristic_key, Command, Role};
use crate::config::EngineConfig;
use crate::connection::ConnectionRegistry;
use crate::discovery::Discovery;
use crate::error::{AdapterResult, EngineError, EngineResult, GattStatus};
use crate::event::{Event, EventSink};
use crate::gatt_cache::GattCache;
use crate::peripheral::PeripheralRole;
use crate::types::{CharacteristicKey, DeviceId, WriteType};

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Roles requested by `Initialize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    pub central: bool,
    pub peripheral: bool,
}

impl Roles {
    pub fn allows(&self, role: Role) -> bool {
        match role {
            Role::Central => self.central,
            Role::Peripheral => self.peripheral,
        }
    }
}

/// Engine state for one `Initialize` .. `DeInitialize` span
pub struct Session<A: BleAdapter> {
    pub(crate) adapter: Arc<A>,
    pub(crate) config: EngineConfig,
    events: EventSink,
    roles: Roles,
    /// Cleared once the session is shut down or replaced; inactive sessions stay silent
    active: AtomicBool,
    /// Cleared when teardown begins; no native resource is admitted afterwards
    open: AtomicBool,
    pub(crate) discovery: Mutex<Discovery>,
    /// Lock order: `registry` before `cache`
    pub(crate) registry: RwLock<ConnectionRegistry<A::Device>>,
    pub(crate) cache: Mutex<GattCache<A::Service, A::Characteristic>>,
    pub(crate) peripheral: Mutex<PeripheralRole<A::ServiceProvider>>,
}

impl<A: BleAdapter> Session<A> {
    pub fn new(adapter: Arc<A>, config: EngineConfig, events: EventSink, roles: Roles) -> Self {
        Self {
            adapter,
            config,
            events,
            roles,
            active: AtomicBool::new(true),
            open: AtomicBool::new(true),
            discovery: Mutex::new(Discovery::new()),
            registry: RwLock::new(ConnectionRegistry::new()),
            cache: Mutex::new(GattCache::new()),
            peripheral: Mutex::new(PeripheralRole::new()),
        }
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) {
        self.close();
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether the session still accepts new connections and handles
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Send an event to the host unless the session has been retired
    pub(crate) fn emit(&self, event: Event) {
        if !self.is_active() {
            tracing::trace!("Suppressing {} from inactive session", event.kind());
            return;
        }
        if let Err(e) = self.events.send(event) {
            tracing::debug!("Event dropped: {}", e);
        }
    }

    /// Bound a native call; expiry is reported as [`GattStatus::Timeout`]
    pub(crate) async fn timed<T, F>(&self, limit: Duration, call: F) -> AdapterResult<T>
    where
        F: Future<Output = AdapterResult<T>>,
    {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(GattStatus::Timeout),
        }
    }

    /// Surface a handler outcome: native failures become `Error` events, the rest is logged
    pub(crate) fn report(&self, origin: &str, result: EngineResult<()>) {
        match result {
            Ok(()) => {}
            Err(EngineError::Native(status)) => {
                tracing::warn!("{} failed: {}", origin, status);
                self.emit(Event::Error { status });
            }
            Err(e) => tracing::debug!("{} ignored: {}", origin, e),
        }
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Run one command against this session
    pub async fn handle(&self, command: Command) -> EngineResult<()> {
        if !self.is_active() {
            return Err(EngineError::Precondition("session is no longer active".into()));
        }

        match command {
            Command::Initialize { .. } => Err(EngineError::Precondition(
                "session already initialized".into(),
            )),
            Command::DeInitialize => self.shutdown().await,
            Command::ScanForPeripheralsWithServices {
                service_uuids,
                allow_duplicates,
                rssi_only,
                clear_peripheral_list,
            } => {
                self.start_scan(
                    service_uuids.as_deref(),
                    allow_duplicates,
                    rssi_only,
                    clear_peripheral_list,
                )
                .await
            }
            Command::RetrieveListOfPeripheralsWithServices { service_uuids } => {
                self.retrieve_connected(service_uuids.as_deref()).await
            }
            Command::StopScan => self.stop_scan().await,
            Command::StopBeaconScan => Ok(()),
            Command::DisconnectAll => self.disconnect_all().await,
            Command::ConnectToPeripheral { name } => self.connect(DeviceId::new(name)).await,
            Command::DisconnectPeripheral { name } => self.disconnect(DeviceId::new(name)).await,
            Command::ReadCharacteristic {
                name,
                service,
                characteristic,
            } => {
                self.read_characteristic(characteristic_key(&name, &service, &characteristic)?)
                    .await
            }
            Command::WriteCharacteristic {
                name,
                service,
                characteristic,
                data,
                with_response,
            } => {
                let key = characteristic_key(&name, &service, &characteristic)?;
                self.write_characteristic(key, data, WriteType::from_response_flag(with_response))
                    .await
            }
            Command::SubscribeCharacteristic {
                name,
                service,
                characteristic,
            } => {
                self.subscribe(characteristic_key(&name, &service, &characteristic)?)
                    .await
            }
            Command::UnSubscribeCharacteristic {
                name,
                service,
                characteristic,
            } => {
                self.unsubscribe(characteristic_key(&name, &service, &characteristic)?)
                    .await
            }
            Command::PeripheralName { new_name } => self.set_local_name(new_name).await,
            Command::CreateService { uuid, primary } => self.create_service(&uuid, primary).await,
            Command::RemoveService { uuid } => self.remove_service(&uuid).await,
            Command::RemoveServices => self.remove_services().await,
            Command::CreateCharacteristic {
                uuid,
                properties,
                permissions,
                data,
            } => {
                self.define_characteristic(&uuid, properties, permissions, data)
                    .await
            }
            Command::RemoveCharacteristic { uuid } => self.undefine_characteristic(&uuid).await,
            Command::RemoveCharacteristics => self.undefine_all_characteristics().await,
            Command::StartAdvertising => self.start_advertising().await,
            Command::StopAdvertising => self.stop_advertising().await,
            Command::UpdateCharacteristicValue { uuid, data } => {
                self.push_characteristic_value(&uuid, data).await
            }
        }
    }

    /// Run one native callback against this session
    pub async fn handle_adapter_event(&self, event: AdapterEvent) -> EngineResult<()> {
        if !self.is_active() {
            return Err(EngineError::Precondition("session is no longer active".into()));
        }

        match event {
            AdapterEvent::Advertisement(advertisement) => {
                self.on_advertisement(advertisement).await
            }
            AdapterEvent::Disconnected(device) => {
                let (handle, _) = self.connected_handle(&device).await?;
                if self.adapter.is_connected(&handle).await {
                    tracing::debug!("Ignoring late disconnect of {}; current link is up", device);
                    return Ok(());
                }
                tracing::info!("{} dropped the connection", device);
                self.disconnect(device).await
            }
            AdapterEvent::ValueChanged {
                device,
                service,
                characteristic,
                value,
            } => {
                self.on_value_changed(CharacteristicKey::new(device, service, characteristic), value)
                    .await
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Release every native resource the session holds
    async fn teardown(&self) {
        self.close();
        let steps = [
            ("RemoveCharacteristics", self.undefine_all_characteristics().await),
            ("RemoveServices", self.remove_services().await),
            ("StopScan", self.stop_scan().await),
            ("DisconnectAll", self.disconnect_all().await),
        ];
        for (origin, result) in steps {
            self.report(origin, result);
        }

        let leftovers = self.cache.lock().await.drain_all();
        for service in leftovers {
            self.adapter.release_service(service).await;
        }
    }

    /// Tear down and announce `DeInitialized`; the session is silent afterwards
    pub(crate) async fn shutdown(&self) -> EngineResult<()> {
        tracing::info!("Session shutting down");
        self.teardown().await;
        self.emit(Event::DeInitialized);
        self.deactivate();
        Ok(())
    }

    /// Tear down without emitting anything; used when a new session replaces this one
    pub(crate) async fn retire(&self) {
        tracing::info!("Retiring previous session");
        self.deactivate();
        self.teardown().await;
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Point-in-time view of the session's bookkeeping
    pub async fn snapshot(&self) -> SessionSnapshot {
        let (scanning, discovered) = {
            let discovery = self.discovery.lock().await;
            (discovery.is_scanning(), discovery.len())
        };
        let mut connected = self.registry.read().await.ids();
        connected.sort();
        let (cached_services, cached_characteristics, mut subscriptions) = {
            let cache = self.cache.lock().await;
            (
                cache.service_count(),
                cache.characteristic_count(),
                cache.subscriptions(),
            )
        };
        subscriptions.sort_by_key(|key| key.to_string());
        let (local_services, advertising) = {
            let role = self.peripheral.lock().await;
            (role.service_count(), role.is_advertising())
        };

        SessionSnapshot {
            roles: self.roles,
            scanning,
            discovered,
            connected,
            cached_services,
            cached_characteristics,
            subscriptions,
            local_services,
            advertising,
        }
    }
}

/// Counts and keys describing a session, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub roles: Roles,
    pub scanning: bool,
    /// Entries in the device record table
    pub discovered: usize,
    pub connected: Vec<DeviceId>,
    pub cached_services: usize,
    pub cached_characteristics: usize,
    pub subscriptions: Vec<CharacteristicKey>,
    pub local_services: usize,
    pub advertising: bool,
}
