//! GATT resource cache
//!
//! Service and characteristic handles are native resources. A handle is kept here only
//! while at least one subscription references it; everything else is resolved afresh for
//! a single operation and released straight after. Resolution hands out a [`ServiceLease`]
//! that remembers whether the handle came from the cache, so the release path never has
//! to trust the caller about who owns it.

use std::collections::HashMap;

use crate::adapter::{BleAdapter, GattHandle};
use crate::error::EngineResult;
use crate::event::Event;
use crate::session::Session;
use crate::types::{CharacteristicKey, DeviceId, ServiceKey};

// ----------------------------------------------------------------------------
// Leases
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseOrigin {
    /// Borrowed from the cache entry with this id
    Cached { key: ServiceKey, id: u64 },
    /// Enumerated for this operation only
    Fresh,
}

/// A service handle held for the duration of one operation
#[derive(Debug)]
pub struct ServiceLease<S> {
    pub handle: S,
    origin: LeaseOrigin,
}

impl<S> ServiceLease<S> {
    /// Wrap a handle obtained from a fresh enumeration
    pub fn fresh(handle: S) -> Self {
        Self {
            handle,
            origin: LeaseOrigin::Fresh,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.origin, LeaseOrigin::Cached { .. })
    }
}

#[derive(Debug)]
struct CachedService<S> {
    id: u64,
    handle: S,
    /// Subscribed characteristics under this service
    subscribers: usize,
    /// Operations currently borrowing the handle
    leases: usize,
}

impl<S> CachedService<S> {
    fn is_unreferenced(&self) -> bool {
        self.subscribers == 0 && self.leases == 0
    }
}

// ----------------------------------------------------------------------------
// Cache
// ----------------------------------------------------------------------------

/// Retained service and characteristic handles keyed by composite key.
///
/// Methods never call the adapter. Handles that must be released are returned to the
/// caller, which releases them after dropping the lock.
#[derive(Debug)]
pub struct GattCache<S, C> {
    services: HashMap<ServiceKey, CachedService<S>>,
    characteristics: HashMap<CharacteristicKey, C>,
    /// Entries drained by a disconnect while still leased
    retiring: HashMap<u64, CachedService<S>>,
    next_id: u64,
}

impl<S, C> Default for GattCache<S, C> {
    fn default() -> Self {
        Self {
            services: HashMap::new(),
            characteristics: HashMap::new(),
            retiring: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<S: Clone, C: Clone> GattCache<S, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the cached service for `key`, if one is retained
    pub fn lease_service(&mut self, key: &ServiceKey) -> Option<ServiceLease<S>> {
        let entry = self.services.get_mut(key)?;
        entry.leases += 1;
        Some(ServiceLease {
            handle: entry.handle.clone(),
            origin: LeaseOrigin::Cached {
                key: key.clone(),
                id: entry.id,
            },
        })
    }

    pub fn cached_characteristic(&self, key: &CharacteristicKey) -> Option<C> {
        self.characteristics.get(key).cloned()
    }

    /// Return a lease, yielding the handle to release if nothing references it any more
    pub fn return_lease(&mut self, lease: ServiceLease<S>) -> Option<S> {
        let (key, id) = match lease.origin {
            LeaseOrigin::Fresh => return Some(lease.handle),
            LeaseOrigin::Cached { key, id } => (key, id),
        };

        if let Some(entry) = self.services.get_mut(&key).filter(|entry| entry.id == id) {
            entry.leases = entry.leases.saturating_sub(1);
            if entry.is_unreferenced() {
                return self.services.remove(&key).map(|entry| entry.handle);
            }
            return None;
        }

        let entry = self.retiring.get_mut(&id)?;
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases == 0 {
            return self.retiring.remove(&id).map(|entry| entry.handle);
        }
        None
    }

    /// Commit a subscription, converting the lease into a retained reference.
    ///
    /// The caller must have verified under the registry lock that the device is still
    /// connected. Returns a duplicate handle to release when another subscription under
    /// the same service committed first.
    pub fn insert_subscription(
        &mut self,
        characteristic_key: CharacteristicKey,
        lease: ServiceLease<S>,
        characteristic: C,
    ) -> Option<S> {
        if self.characteristics.contains_key(&characteristic_key) {
            return self.return_lease(lease);
        }
        let service_key = characteristic_key.service_key();

        let cached = match &lease.origin {
            LeaseOrigin::Cached { key, id } => Some((key == &service_key, *id)),
            LeaseOrigin::Fresh => None,
        };

        match cached {
            Some((false, _)) => self.return_lease(lease),
            Some((true, id)) => {
                match self.services.get_mut(&service_key).filter(|entry| entry.id == id) {
                    Some(entry) => {
                        entry.leases = entry.leases.saturating_sub(1);
                        entry.subscribers += 1;
                    }
                    None => {
                        tracing::warn!("Subscription committed against a retired service");
                        return self.return_lease(lease);
                    }
                }
                self.characteristics.insert(characteristic_key, characteristic);
                None
            }
            None => {
                let duplicate = match self.services.get_mut(&service_key) {
                    Some(entry) => {
                        entry.subscribers += 1;
                        Some(lease.handle)
                    }
                    None => {
                        let id = self.next_id;
                        self.next_id += 1;
                        self.services.insert(
                            service_key,
                            CachedService {
                                id,
                                handle: lease.handle,
                                subscribers: 1,
                                leases: 0,
                            },
                        );
                        None
                    }
                };
                self.characteristics.insert(characteristic_key, characteristic);
                duplicate
            }
        }
    }

    /// Drop a subscription.
    ///
    /// `None` when the key was not subscribed; otherwise the service handle to release
    /// if this was the last reference to it.
    pub fn remove_subscription(&mut self, key: &CharacteristicKey) -> Option<Option<S>> {
        self.characteristics.remove(key)?;
        let service_key = key.service_key();
        let entry = self.services.get_mut(&service_key)?;
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.is_unreferenced() {
            return Some(self.services.remove(&service_key).map(|entry| entry.handle));
        }
        Some(None)
    }

    /// Remove every entry of a device, returning the handles free to release now
    pub fn drain_device(&mut self, device: &DeviceId) -> Vec<S> {
        self.characteristics.retain(|key, _| &key.device != device);
        let keys: Vec<ServiceKey> = self
            .services
            .keys()
            .filter(|key| &key.device == device)
            .cloned()
            .collect();
        let entries: Vec<CachedService<S>> = keys
            .into_iter()
            .filter_map(|key| self.services.remove(&key))
            .collect();
        entries
            .into_iter()
            .filter_map(|entry| self.retire(entry))
            .collect()
    }

    /// Remove every entry, returning the handles free to release now
    pub fn drain_all(&mut self) -> Vec<S> {
        self.characteristics.clear();
        let entries: Vec<CachedService<S>> =
            self.services.drain().map(|(_, entry)| entry).collect();
        entries
            .into_iter()
            .filter_map(|entry| self.retire(entry))
            .collect()
    }

    fn retire(&mut self, mut entry: CachedService<S>) -> Option<S> {
        entry.subscribers = 0;
        if entry.leases == 0 {
            return Some(entry.handle);
        }
        self.retiring.insert(entry.id, entry);
        None
    }

    pub fn is_subscribed(&self, key: &CharacteristicKey) -> bool {
        self.characteristics.contains_key(key)
    }

    pub fn subscribers(&self, key: &ServiceKey) -> usize {
        self.services.get(key).map_or(0, |entry| entry.subscribers)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn characteristic_count(&self) -> usize {
        self.characteristics.len()
    }

    pub fn subscriptions(&self) -> Vec<CharacteristicKey> {
        self.characteristics.keys().cloned().collect()
    }

    /// Entries of a device, services and characteristics together
    pub fn entries_for(&self, device: &DeviceId) -> usize {
        self.services.keys().filter(|key| &key.device == device).count()
            + self
                .characteristics
                .keys()
                .filter(|key| &key.device == device)
                .count()
    }
}

// ----------------------------------------------------------------------------
// Resolution
// ----------------------------------------------------------------------------

/// Handles resolved for one operation on a characteristic
pub(crate) struct Resolved<A: BleAdapter> {
    pub service: ServiceLease<A::Service>,
    pub characteristic: A::Characteristic,
    /// Connection epoch the handles were resolved under
    pub epoch: u64,
}

impl<A: BleAdapter> Session<A> {
    /// Resolve the handles addressed by `key`.
    ///
    /// Cached handles are borrowed; anything else is enumerated afresh. `Ok(None)` means
    /// the service or characteristic does not exist, which is not an error.
    pub(crate) async fn resolve(&self, key: &CharacteristicKey) -> EngineResult<Option<Resolved<A>>> {
        let (device, epoch) = self.connected_handle(&key.device).await?;
        let service_key = key.service_key();

        let service = {
            let mut cache = self.cache.lock().await;
            if let Some(characteristic) = cache.cached_characteristic(key) {
                if let Some(service) = cache.lease_service(&service_key) {
                    return Ok(Some(Resolved {
                        service,
                        characteristic,
                        epoch,
                    }));
                }
            }
            cache.lease_service(&service_key)
        };

        let service = match service {
            Some(lease) => lease,
            None => match self.enumerate_service(&device, key).await? {
                Some(handle) => ServiceLease::fresh(handle),
                None => return Ok(None),
            },
        };

        let characteristics = match self
            .timed(self.config.gatt_timeout, self.adapter.characteristics(&service.handle))
            .await
        {
            Ok(characteristics) => characteristics,
            Err(status) => {
                self.release(service).await;
                return Err(status.into());
            }
        };

        match characteristics
            .into_iter()
            .find(|characteristic| characteristic.uuid() == key.characteristic)
        {
            Some(characteristic) => Ok(Some(Resolved {
                service,
                characteristic,
                epoch,
            })),
            None => {
                self.release(service).await;
                Ok(None)
            }
        }
    }

    /// Enumerate the device's services, keeping the first match and releasing the rest
    async fn enumerate_service(
        &self,
        device: &A::Device,
        key: &CharacteristicKey,
    ) -> EngineResult<Option<A::Service>> {
        let services = self
            .timed(self.config.gatt_timeout, self.adapter.services(device))
            .await?;

        let mut found = None;
        for service in services {
            if found.is_none() && service.uuid() == key.service {
                found = Some(service);
            } else {
                self.adapter.release_service(service).await;
            }
        }
        Ok(found)
    }

    /// Return a lease, releasing the native handle when nothing else holds it
    pub(crate) async fn release(&self, lease: ServiceLease<A::Service>) {
        let released = self.cache.lock().await.return_lease(lease);
        if let Some(handle) = released {
            self.adapter.release_service(handle).await;
        }
    }

    // ------------------------------------------------------------------------
    // Transient Operations
    // ------------------------------------------------------------------------

    pub(crate) async fn read_characteristic(&self, key: CharacteristicKey) -> EngineResult<()> {
        let Some(resolved) = self.resolve(&key).await? else {
            tracing::debug!("Read target {} not found", key);
            return Ok(());
        };

        let result = self
            .timed(self.config.gatt_timeout, self.adapter.read(&resolved.characteristic))
            .await;
        self.release(resolved.service).await;

        if !self.is_live(&key.device, resolved.epoch).await {
            tracing::debug!("Dropping read completion for departed device {}", key.device);
            return Ok(());
        }
        let value = result?;
        self.emit(Event::DidUpdateValueForCharacteristic {
            device: key.device,
            characteristic: key.characteristic,
            value,
        });
        Ok(())
    }

    pub(crate) async fn write_characteristic(
        &self,
        key: CharacteristicKey,
        value: Vec<u8>,
        write_type: crate::types::WriteType,
    ) -> EngineResult<()> {
        let Some(resolved) = self.resolve(&key).await? else {
            tracing::debug!("Write target {} not found", key);
            return Ok(());
        };

        let result = self
            .timed(
                self.config.gatt_timeout,
                self.adapter.write(&resolved.characteristic, &value, write_type),
            )
            .await;
        self.release(resolved.service).await;

        if !self.is_live(&key.device, resolved.epoch).await {
            tracing::debug!("Dropping write completion for departed device {}", key.device);
            return Ok(());
        }
        result?;
        self.emit(Event::DidWriteCharacteristic {
            characteristic: key.characteristic,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    type Cache = GattCache<&'static str, &'static str>;

    fn key(service: u128, characteristic: u128) -> CharacteristicKey {
        CharacteristicKey::new("AA:BB", Uuid::from_u128(service), Uuid::from_u128(characteristic))
    }

    #[test]
    fn test_fresh_lease_is_released_by_caller() {
        let mut cache = Cache::new();
        assert_eq!(cache.return_lease(ServiceLease::fresh("svc")), Some("svc"));
    }

    #[test]
    fn test_last_subscriber_releases_service() {
        let mut cache = Cache::new();
        let first = key(1, 10);
        let second = key(1, 11);

        assert_eq!(cache.insert_subscription(first.clone(), ServiceLease::fresh("svc"), "c10"), None);
        let lease = cache.lease_service(&first.service_key()).unwrap();
        assert!(lease.is_cached());
        assert_eq!(cache.insert_subscription(second.clone(), lease, "c11"), None);
        assert_eq!(cache.subscribers(&first.service_key()), 2);

        assert_eq!(cache.remove_subscription(&first), Some(None));
        assert!(cache.is_subscribed(&second));
        assert_eq!(cache.service_count(), 1);

        assert_eq!(cache.remove_subscription(&second), Some(Some("svc")));
        assert_eq!(cache.service_count(), 0);
        assert_eq!(cache.remove_subscription(&second), None);
    }

    #[test]
    fn test_racing_fresh_subscription_returns_duplicate() {
        let mut cache = Cache::new();
        assert_eq!(cache.insert_subscription(key(1, 10), ServiceLease::fresh("a"), "c10"), None);
        assert_eq!(cache.insert_subscription(key(1, 11), ServiceLease::fresh("b"), "c11"), Some("b"));
        assert_eq!(cache.subscribers(&key(1, 10).service_key()), 2);
    }

    #[test]
    fn test_leased_service_outlives_last_subscription() {
        let mut cache = Cache::new();
        let subscribed = key(1, 10);
        cache.insert_subscription(subscribed.clone(), ServiceLease::fresh("svc"), "c10");

        let lease = cache.lease_service(&subscribed.service_key()).unwrap();
        assert_eq!(cache.remove_subscription(&subscribed), Some(None));
        assert_eq!(cache.service_count(), 1);
        assert_eq!(cache.return_lease(lease), Some("svc"));
        assert_eq!(cache.service_count(), 0);
    }

    #[test]
    fn test_drain_defers_leased_services() {
        let mut cache = Cache::new();
        cache.insert_subscription(key(1, 10), ServiceLease::fresh("one"), "c10");
        cache.insert_subscription(key(2, 20), ServiceLease::fresh("two"), "c20");
        let lease = cache.lease_service(&key(2, 20).service_key()).unwrap();

        let released = cache.drain_device(&"AA:BB".into());
        assert_eq!(released, vec!["one"]);
        assert_eq!(cache.entries_for(&"AA:BB".into()), 0);
        assert_eq!(cache.return_lease(lease), Some("two"));
    }

    #[test]
    fn test_drain_device_keeps_other_devices() {
        let mut cache = Cache::new();
        let other = CharacteristicKey::new("CC:DD", Uuid::from_u128(1), Uuid::from_u128(10));
        cache.insert_subscription(key(1, 10), ServiceLease::fresh("mine"), "c10");
        cache.insert_subscription(key(2, 20), ServiceLease::fresh("also-mine"), "c20");
        cache.insert_subscription(other.clone(), ServiceLease::fresh("theirs"), "c10");

        let mut released = cache.drain_device(&"AA:BB".into());
        released.sort_unstable();
        assert_eq!(released, vec!["also-mine", "mine"]);
        assert!(cache.is_subscribed(&other));
        assert_eq!(cache.service_count(), 1);
        assert_eq!(cache.entries_for(&"CC:DD".into()), 2);
    }
}
