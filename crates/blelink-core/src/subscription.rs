//! Subscription manager: value-change notifications on remote characteristics

use crate::adapter::BleAdapter;
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::session::Session;
use crate::types::CharacteristicKey;

impl<A: BleAdapter> Session<A> {
    /// Enable notifications on a characteristic and retain its handles.
    ///
    /// Nothing is cached unless the native call succeeds and the device is still the
    /// same connection when the result arrives.
    pub(crate) async fn subscribe(&self, key: CharacteristicKey) -> EngineResult<()> {
        if self.cache.lock().await.is_subscribed(&key) {
            return Ok(());
        }

        let Some(resolved) = self.resolve(&key).await? else {
            tracing::debug!("Subscription target {} not found", key);
            return Ok(());
        };

        let enabled = self
            .timed(
                self.config.gatt_timeout,
                self.adapter.set_notify(&resolved.characteristic, true),
            )
            .await;

        if let Err(status) = enabled {
            self.release(resolved.service).await;
            if !self.is_live(&key.device, resolved.epoch).await {
                return Ok(());
            }
            tracing::warn!("Failed to subscribe to {}: {}", key, status);
            return Err(status.into());
        }

        let committed = {
            let registry = self.registry.read().await;
            if registry.is_live(&key.device, resolved.epoch) {
                let duplicate = self.cache.lock().await.insert_subscription(
                    key.clone(),
                    resolved.service,
                    resolved.characteristic,
                );
                self.emit(Event::DidUpdateNotificationStateForCharacteristic {
                    device: key.device.clone(),
                    characteristic: key.characteristic,
                });
                Ok(duplicate)
            } else {
                Err(resolved.service)
            }
        };

        match committed {
            Ok(Some(duplicate)) => self.adapter.release_service(duplicate).await,
            Ok(None) => tracing::debug!("Subscribed to {}", key),
            Err(orphaned) => {
                tracing::debug!("Dropping subscription for departed device {}", key.device);
                self.release(orphaned).await;
            }
        }
        Ok(())
    }

    /// Disable notifications and drop the subscription.
    ///
    /// Local bookkeeping is released even when the native disable fails; the failure is
    /// still reported.
    pub(crate) async fn unsubscribe(&self, key: CharacteristicKey) -> EngineResult<()> {
        let (_, epoch) = self.connected_handle(&key.device).await?;
        let characteristic = self
            .cache
            .lock()
            .await
            .cached_characteristic(&key)
            .ok_or_else(|| EngineError::Precondition(format!("{key} is not subscribed")))?;

        let disabled = self
            .timed(
                self.config.gatt_timeout,
                self.adapter.set_notify(&characteristic, false),
            )
            .await;

        let removed = {
            let registry = self.registry.read().await;
            if registry.is_live(&key.device, epoch) {
                Some(self.cache.lock().await.remove_subscription(&key))
            } else {
                None
            }
        };

        let Some(removed) = removed else {
            // Teardown already drained the entries and released the handles
            return Ok(());
        };
        if let Some(Some(service)) = removed {
            self.adapter.release_service(service).await;
        }

        if let Err(status) = disabled {
            tracing::warn!("Failed to disable notifications on {}: {}", key, status);
            return Err(status.into());
        }
        tracing::debug!("Unsubscribed from {}", key);
        Ok(())
    }

    /// Forward a pushed value if its characteristic is subscribed
    pub(crate) async fn on_value_changed(
        &self,
        key: CharacteristicKey,
        value: Vec<u8>,
    ) -> EngineResult<()> {
        let cache = self.cache.lock().await;
        if !cache.is_subscribed(&key) {
            return Err(EngineError::Precondition(format!("{key} is not subscribed")));
        }
        self.emit(Event::DidUpdateValueForCharacteristic {
            device: key.device,
            characteristic: key.characteristic,
            value,
        });
        Ok(())
    }
}
