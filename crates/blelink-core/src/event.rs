//! Outbound events and their `Kind~field~...` wire encoding

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, GattStatus};
use crate::types::DeviceId;

/// Separator between the event kind and its fields
pub const FIELD_SEPARATOR: char = '~';

// ----------------------------------------------------------------------------
// Event Types
// ----------------------------------------------------------------------------

/// Signal strength and optional advertisement payload of a discovery report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReport {
    pub rssi: i16,
    /// Encoded manufacturer data; empty when only the signal strength is reported
    pub payload: Vec<u8>,
}

/// Every message the engine can send to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialized,
    DeInitialized,
    DiscoveredPeripheral {
        device: DeviceId,
        name: String,
        signal: Option<SignalReport>,
    },
    RetrievedConnectedPeripheral {
        device: DeviceId,
        name: String,
    },
    /// Carries the display name the device was connected under
    ConnectedPeripheral {
        name: String,
    },
    DisconnectedPeripheral {
        device: DeviceId,
    },
    DiscoveredService {
        name: String,
        service: Uuid,
    },
    DiscoveredCharacteristic {
        name: String,
        service: Uuid,
        characteristic: Uuid,
    },
    DidUpdateValueForCharacteristic {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DidWriteCharacteristic {
        characteristic: Uuid,
    },
    DidUpdateNotificationStateForCharacteristic {
        device: DeviceId,
        characteristic: Uuid,
    },
    StoppedAdvertising,
    Error {
        status: GattStatus,
    },
}

impl Event {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Initialized => "Initialized",
            Event::DeInitialized => "DeInitialized",
            Event::DiscoveredPeripheral { .. } => "DiscoveredPeripheral",
            Event::RetrievedConnectedPeripheral { .. } => "RetrievedConnectedPeripheral",
            Event::ConnectedPeripheral { .. } => "ConnectedPeripheral",
            Event::DisconnectedPeripheral { .. } => "DisconnectedPeripheral",
            Event::DiscoveredService { .. } => "DiscoveredService",
            Event::DiscoveredCharacteristic { .. } => "DiscoveredCharacteristic",
            Event::DidUpdateValueForCharacteristic { .. } => "DidUpdateValueForCharacteristic",
            Event::DidWriteCharacteristic { .. } => "DidWriteCharacteristic",
            Event::DidUpdateNotificationStateForCharacteristic { .. } => {
                "DidUpdateNotificationStateForCharacteristic"
            }
            Event::StoppedAdvertising => "StoppedAdvertising",
            Event::Error { .. } => "Error",
        }
    }

    /// Encode the event as a single `Kind~field1~field2...` message
    pub fn encode(&self) -> String {
        let mut fields: Vec<String> = vec![self.kind().to_string()];
        match self {
            Event::Initialized | Event::DeInitialized | Event::StoppedAdvertising => {}
            Event::DiscoveredPeripheral {
                device,
                name,
                signal,
            } => {
                fields.push(device.to_string());
                fields.push(name.clone());
                if let Some(signal) = signal {
                    fields.push(signal.rssi.to_string());
                    fields.push(STANDARD.encode(&signal.payload));
                }
            }
            Event::RetrievedConnectedPeripheral { device, name } => {
                fields.push(device.to_string());
                fields.push(name.clone());
            }
            Event::ConnectedPeripheral { name } => fields.push(name.clone()),
            Event::DisconnectedPeripheral { device } => fields.push(device.to_string()),
            Event::DiscoveredService { name, service } => {
                fields.push(name.clone());
                fields.push(service.to_string());
            }
            Event::DiscoveredCharacteristic {
                name,
                service,
                characteristic,
            } => {
                fields.push(name.clone());
                fields.push(service.to_string());
                fields.push(characteristic.to_string());
            }
            Event::DidUpdateValueForCharacteristic {
                device,
                characteristic,
                value,
            } => {
                fields.push(device.to_string());
                fields.push(characteristic.to_string());
                fields.push(STANDARD.encode(value));
            }
            Event::DidWriteCharacteristic { characteristic } => {
                fields.push(characteristic.to_string())
            }
            Event::DidUpdateNotificationStateForCharacteristic {
                device,
                characteristic,
            } => {
                fields.push(device.to_string());
                fields.push(characteristic.to_string());
            }
            Event::Error { status } => fields.push(status.to_string()),
        }
        fields.join(&FIELD_SEPARATOR.to_string())
    }
}

impl From<GattStatus> for Event {
    fn from(status: GattStatus) -> Self {
        Event::Error { status }
    }
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Ordered outbound event stream shared by every lane
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving end of its stream
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn send(&self, event: Event) -> EngineResult<()> {
        tracing::trace!("Emitting {}", event.kind());
        self.sender
            .send(event)
            .map_err(|_| EngineError::ChannelClosed)
    }
}
