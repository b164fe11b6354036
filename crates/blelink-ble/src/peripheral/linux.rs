//! Linux GATT server and advertising using bluer (BlueZ)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use blelink_core::{
    AdapterResult, AdvertisingParameters, AttributePermissions, CharacteristicProperties,
    GattStatus, LocalCharacteristicSpec,
};
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, Service,
};
use futures::FutureExt;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};
use uuid::Uuid;

use super::{GattServer, LocalServiceHandle};
use crate::error::status_from_bluer;

// ----------------------------------------------------------------------------
// Local Values
// ----------------------------------------------------------------------------

/// Current value of a hosted characteristic and the centrals subscribed to it
#[derive(Default)]
struct LocalValue {
    value: std::sync::Mutex<Vec<u8>>,
    notifiers: Mutex<Vec<CharacteristicNotifier>>,
}

impl LocalValue {
    fn with_value(value: Vec<u8>) -> Self {
        Self {
            value: std::sync::Mutex::new(value),
            notifiers: Mutex::new(Vec::new()),
        }
    }

    fn current(&self) -> Vec<u8> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, value: Vec<u8>) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Push `value` to every subscriber, dropping those that went away
    async fn broadcast(&self, value: &[u8]) {
        let mut notifiers = self.notifiers.lock().await;
        let mut live = Vec::with_capacity(notifiers.len());
        for mut notifier in notifiers.drain(..) {
            match notifier.notify(value.to_vec()).await {
                Ok(()) => live.push(notifier),
                Err(e) => debug!("Dropping notification subscriber: {}", e),
            }
        }
        *notifiers = live;
    }
}

/// A registered application and its advertisement, if any
struct ServedService {
    uuid: Uuid,
    _application: ApplicationHandle,
    advertisement: Option<AdvertisementHandle>,
    values: Vec<(Uuid, Arc<LocalValue>)>,
}

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct BluezServer {
    adapter_index: usize,
    bluez: OnceCell<(bluer::Session, bluer::Adapter)>,
    services: Mutex<HashMap<u64, ServedService>>,
    next_id: AtomicU64,
}

impl BluezServer {
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            bluez: OnceCell::new(),
            services: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open the BlueZ session on first use and power the adapter on
    async fn adapter(&self) -> AdapterResult<&bluer::Adapter> {
        let (_, adapter) = self
            .bluez
            .get_or_try_init(|| async {
                let session = bluer::Session::new()
                    .await
                    .map_err(|e| status_from_bluer(&e))?;
                let names = session
                    .adapter_names()
                    .await
                    .map_err(|e| status_from_bluer(&e))?;
                let name = names
                    .get(self.adapter_index)
                    .ok_or(GattStatus::Unreachable)?;
                let adapter = session.adapter(name).map_err(|e| status_from_bluer(&e))?;

                if !adapter.is_powered().await.unwrap_or(false) {
                    adapter
                        .set_powered(true)
                        .await
                        .map_err(|e| status_from_bluer(&e))?;
                }

                info!("BlueZ adapter {} initialized for peripheral role", name);
                Ok::<_, GattStatus>((session, adapter))
            })
            .await?;
        Ok(adapter)
    }
}

/// Build the native characteristic for one spec, backed by `value`
fn native_characteristic(spec: &LocalCharacteristicSpec, value: Arc<LocalValue>) -> Characteristic {
    let properties = spec.properties;
    let permissions = spec.permissions;

    let read = properties
        .contains(CharacteristicProperties::READ)
        .then(|| {
            let value = value.clone();
            CharacteristicRead {
                read: true,
                encrypt_read: permissions.contains(AttributePermissions::READ_ENCRYPTION_REQUIRED),
                fun: Box::new(move |_request: CharacteristicReadRequest| {
                    let value = value.clone();
                    async move { Ok::<_, ReqError>(value.current()) }.boxed()
                }),
                ..Default::default()
            }
        });

    let writable = properties.contains(CharacteristicProperties::WRITE);
    let write_without_response = properties.contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE);
    let write = (writable || write_without_response).then(|| {
        let value = value.clone();
        CharacteristicWrite {
            write: writable,
            write_without_response,
            encrypt_write: permissions.contains(AttributePermissions::WRITE_ENCRYPTION_REQUIRED),
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |new_value: Vec<u8>, _request: CharacteristicWriteRequest| {
                    let value = value.clone();
                    async move {
                        value.store(new_value);
                        Ok::<_, ReqError>(())
                    }
                    .boxed()
                },
            )),
            ..Default::default()
        }
    });

    let notify_flag = properties.contains(CharacteristicProperties::NOTIFY);
    let indicate = properties.contains(CharacteristicProperties::INDICATE);
    let notify = (notify_flag || indicate).then(|| CharacteristicNotify {
        notify: notify_flag,
        indicate,
        method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier: CharacteristicNotifier| {
            let value = value.clone();
            async move {
                value.notifiers.lock().await.push(notifier);
            }
            .boxed()
        })),
        ..Default::default()
    });

    Characteristic {
        uuid: spec.uuid,
        read,
        write,
        notify,
        ..Default::default()
    }
}

#[async_trait]
impl GattServer for BluezServer {
    async fn create_service(
        &self,
        uuid: Uuid,
        primary: bool,
        characteristics: &[LocalCharacteristicSpec],
    ) -> AdapterResult<LocalServiceHandle> {
        let adapter = self.adapter().await?;

        let values: Vec<(Uuid, Arc<LocalValue>)> = characteristics
            .iter()
            .map(|spec| (spec.uuid, Arc::new(LocalValue::with_value(spec.value.clone()))))
            .collect();
        let native = characteristics
            .iter()
            .zip(&values)
            .map(|(spec, (_, value))| native_characteristic(spec, value.clone()))
            .collect();

        let application = Application {
            services: vec![Service {
                uuid,
                primary,
                characteristics: native,
                ..Default::default()
            }],
            ..Default::default()
        };
        let handle = adapter
            .serve_gatt_application(application)
            .await
            .map_err(|e| status_from_bluer(&e))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.services.lock().await.insert(
            id,
            ServedService {
                uuid,
                _application: handle,
                advertisement: None,
                values,
            },
        );
        info!("Registered local service {}", uuid);
        Ok(LocalServiceHandle::new(id, uuid))
    }

    async fn release_service(&self, service: LocalServiceHandle) {
        // Dropping the handles unregisters the application and its advertisement
        if let Some(served) = self.services.lock().await.remove(&service.id) {
            debug!("Unregistered local service {}", served.uuid);
        }
    }

    async fn start_advertising(
        &self,
        service: &LocalServiceHandle,
        parameters: &AdvertisingParameters,
    ) -> AdapterResult<()> {
        let adapter = self.adapter().await?;
        let advertisement = Advertisement {
            advertisement_type: Type::Peripheral,
            service_uuids: [service.uuid()].into_iter().collect(),
            local_name: parameters.local_name.clone(),
            discoverable: Some(parameters.discoverable),
            ..Default::default()
        };

        let mut services = self.services.lock().await;
        let served = services
            .get_mut(&service.id)
            .ok_or(GattStatus::ProtocolError)?;
        let handle = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| status_from_bluer(&e))?;
        served.advertisement = Some(handle);

        info!("Advertising local service {}", served.uuid);
        Ok(())
    }

    async fn stop_advertising(&self, service: &LocalServiceHandle) -> AdapterResult<()> {
        let mut services = self.services.lock().await;
        if let Some(served) = services.get_mut(&service.id) {
            if served.advertisement.take().is_some() {
                info!("Stopped advertising local service {}", served.uuid);
            }
        }
        Ok(())
    }

    async fn notify_value(
        &self,
        service: &LocalServiceHandle,
        characteristic: Uuid,
        value: &[u8],
    ) -> AdapterResult<()> {
        let targets: Vec<Arc<LocalValue>> = {
            let services = self.services.lock().await;
            let served = services.get(&service.id).ok_or(GattStatus::ProtocolError)?;
            served
                .values
                .iter()
                .filter(|(uuid, _)| *uuid == characteristic)
                .map(|(_, local)| local.clone())
                .collect()
        };
        if targets.is_empty() {
            return Err(GattStatus::ProtocolError);
        }

        for local in targets {
            local.store(value.to_vec());
            local.broadcast(value).await;
        }
        Ok(())
    }
}
