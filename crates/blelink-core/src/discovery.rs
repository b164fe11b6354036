//! Discovery engine: scan filter, device records and advertisement reporting

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::adapter::{Advertisement, BleAdapter};
use crate::error::{EngineError, EngineResult};
use crate::event::{Event, SignalReport};
use crate::session::Session;
use crate::types::{parse_uuid_list, DeviceId};

// ----------------------------------------------------------------------------
// Discovery State
// ----------------------------------------------------------------------------

/// Scan parameters set by the last scan command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConfig {
    /// Service filter; empty means unfiltered
    pub services: Vec<Uuid>,
    pub allow_duplicates: bool,
    pub rssi_only: bool,
}

/// Last known state of an advertising device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device: DeviceId,
    pub name: String,
    pub rssi: i16,
    /// Encoded manufacturer data of the latest advertisement, if it carried any
    pub manufacturer_data: Option<Vec<u8>>,
}

/// Scan filter, de-duplication policy and the device record table
#[derive(Debug, Default)]
pub struct Discovery {
    records: HashMap<DeviceId, DeviceRecord>,
    scan: ScanConfig,
    scanning: bool,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a scan command. A `None` filter keeps the current one.
    pub fn configure(
        &mut self,
        filter: Option<Vec<Uuid>>,
        allow_duplicates: bool,
        rssi_only: bool,
        clear_existing: bool,
    ) {
        if clear_existing {
            self.records.clear();
        }
        if let Some(services) = filter {
            self.scan.services = services;
        }
        self.scan.allow_duplicates = allow_duplicates;
        self.scan.rssi_only = rssi_only;
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn set_scanning(&mut self, scanning: bool) {
        self.scanning = scanning;
    }

    /// Whether an advertisement passes the active scan
    pub fn accepts(&self, advertisement: &Advertisement) -> bool {
        if !self.scanning {
            return false;
        }
        self.scan.services.is_empty()
            || advertisement
                .services
                .iter()
                .any(|service| self.scan.services.contains(service))
    }

    /// Record an advertisement under its resolved name and pick the report to emit.
    ///
    /// The record is always updated; the report is `None` when duplicates are suppressed.
    pub fn record_advertisement(
        &mut self,
        advertisement: &Advertisement,
        name: String,
    ) -> Option<Event> {
        let duplicate = self.records.contains_key(&advertisement.device);
        let manufacturer_data = encode_manufacturer_data(&advertisement.manufacturer_data);

        self.records.insert(
            advertisement.device.clone(),
            DeviceRecord {
                device: advertisement.device.clone(),
                name: name.clone(),
                rssi: advertisement.rssi,
                manufacturer_data: manufacturer_data.clone(),
            },
        );

        if duplicate && !self.scan.allow_duplicates {
            return None;
        }

        let signal = match manufacturer_data {
            Some(payload) => Some(SignalReport {
                rssi: advertisement.rssi,
                payload,
            }),
            None if self.scan.rssi_only && advertisement.rssi != 0 => Some(SignalReport {
                rssi: advertisement.rssi,
                payload: Vec::new(),
            }),
            None => None,
        };

        Some(Event::DiscoveredPeripheral {
            device: advertisement.device.clone(),
            name,
            signal,
        })
    }

    /// Record a device reported as already connected at system level
    pub fn insert_retrieved(&mut self, device: DeviceId, name: String) {
        self.records.insert(
            device.clone(),
            DeviceRecord {
                device,
                name,
                rssi: 0,
                manufacturer_data: None,
            },
        );
    }

    pub fn record(&self, device: &DeviceId) -> Option<&DeviceRecord> {
        self.records.get(device)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Encode the first manufacturer section as company id (little endian) followed by payload
pub fn encode_manufacturer_data(sections: &BTreeMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (company, payload) = sections.iter().next()?;
    let mut encoded = Vec::with_capacity(payload.len() + 2);
    encoded.extend_from_slice(&company.to_le_bytes());
    encoded.extend_from_slice(payload);
    Some(encoded)
}

fn parse_filter(filter: Option<&str>) -> EngineResult<Vec<Uuid>> {
    match filter {
        None => Ok(Vec::new()),
        Some(text) => parse_uuid_list(text)
            .ok_or_else(|| EngineError::InvalidCommand(format!("bad service filter {text:?}"))),
    }
}

// ----------------------------------------------------------------------------
// Discovery Operations
// ----------------------------------------------------------------------------

impl<A: BleAdapter> Session<A> {
    pub(crate) async fn start_scan(
        &self,
        filter: Option<&str>,
        allow_duplicates: bool,
        rssi_only: bool,
        clear_existing: bool,
    ) -> EngineResult<()> {
        let filter = parse_filter(filter)?;
        let filter = (!filter.is_empty()).then_some(filter);
        let services = match &filter {
            Some(services) => services.clone(),
            None => self.discovery.lock().await.scan_config().services.clone(),
        };

        self.adapter.start_scan(&services).await?;
        {
            let mut discovery = self.discovery.lock().await;
            discovery.configure(filter, allow_duplicates, rssi_only, clear_existing);
            discovery.set_scanning(true);
        }
        tracing::info!(
            "Scanning for {} service(s), duplicates {}",
            services.len(),
            if allow_duplicates { "allowed" } else { "suppressed" }
        );
        Ok(())
    }

    pub(crate) async fn stop_scan(&self) -> EngineResult<()> {
        {
            let mut discovery = self.discovery.lock().await;
            if !discovery.is_scanning() {
                return Ok(());
            }
            discovery.set_scanning(false);
        }
        self.adapter.stop_scan().await?;
        tracing::info!("Scanning stopped");
        Ok(())
    }

    pub(crate) async fn on_advertisement(&self, advertisement: Advertisement) -> EngineResult<()> {
        if !self.discovery.lock().await.accepts(&advertisement) {
            return Ok(());
        }

        let name = match advertisement.local_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let lookup = self.adapter.resolve_name(&advertisement.device);
                match tokio::time::timeout(self.config.name_resolution_timeout, lookup).await {
                    Ok(Some(name)) if !name.is_empty() => name,
                    _ => {
                        tracing::trace!("Dropping unnamed advertiser {}", advertisement.device);
                        return Ok(());
                    }
                }
            }
        };

        let report = {
            let mut discovery = self.discovery.lock().await;
            // The scan may have stopped while the name was being resolved
            if !discovery.accepts(&advertisement) {
                return Ok(());
            }
            discovery.record_advertisement(&advertisement, name)
        };

        if let Some(event) = report {
            self.emit(event);
        }
        Ok(())
    }

    pub(crate) async fn retrieve_connected(&self, filter: Option<&str>) -> EngineResult<()> {
        let services = parse_filter(filter)?;
        self.discovery.lock().await.clear();

        let devices = self.adapter.retrieve_connected(&services).await?;
        let mut discovery = self.discovery.lock().await;
        for retrieved in devices {
            discovery.insert_retrieved(retrieved.device.clone(), retrieved.name.clone());
            self.emit(Event::RetrievedConnectedPeripheral {
                device: retrieved.device,
                name: retrieved.name,
            });
        }
        Ok(())
    }
}
