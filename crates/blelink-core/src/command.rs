//! Inbound commands
//!
//! Each command is a JSON object whose `command` field names the kind; the remaining
//! fields keep the wire protocol's names. UUIDs travel as text and are only parsed by
//! the handler that needs them, so a malformed UUID drops one command, not the stream.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{parse_uuid, CharacteristicKey, DeviceId};

// ----------------------------------------------------------------------------
// Command Types
// ----------------------------------------------------------------------------

/// The role a command requires the session to have been initialized with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

/// Every command the host can issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    Initialize {
        #[serde(rename = "asCentral", default)]
        as_central: bool,
        #[serde(rename = "asPeripheral", default)]
        as_peripheral: bool,
    },
    DeInitialize,
    ScanForPeripheralsWithServices {
        /// Pipe-separated UUID list; absent or empty keeps the current filter
        #[serde(rename = "serviceUUIDsString", default)]
        service_uuids: Option<String>,
        #[serde(rename = "allowDuplicates", default)]
        allow_duplicates: bool,
        #[serde(rename = "rssiOnly", default)]
        rssi_only: bool,
        #[serde(rename = "clearPeripheralList", default)]
        clear_peripheral_list: bool,
    },
    RetrieveListOfPeripheralsWithServices {
        #[serde(rename = "serviceUUIDsString", default)]
        service_uuids: Option<String>,
    },
    StopScan,
    StopBeaconScan,
    DisconnectAll,
    ConnectToPeripheral {
        #[serde(default)]
        name: String,
    },
    DisconnectPeripheral {
        #[serde(default)]
        name: String,
    },
    ReadCharacteristic {
        #[serde(default)]
        name: String,
        #[serde(default)]
        service: String,
        #[serde(default)]
        characteristic: String,
    },
    WriteCharacteristic {
        #[serde(default)]
        name: String,
        #[serde(default)]
        service: String,
        #[serde(default)]
        characteristic: String,
        #[serde(default, with = "base64_bytes")]
        data: Vec<u8>,
        #[serde(rename = "withResponse", default)]
        with_response: bool,
    },
    SubscribeCharacteristic {
        #[serde(default)]
        name: String,
        #[serde(default)]
        service: String,
        #[serde(default)]
        characteristic: String,
    },
    UnSubscribeCharacteristic {
        #[serde(default)]
        name: String,
        #[serde(default)]
        service: String,
        #[serde(default)]
        characteristic: String,
    },
    PeripheralName {
        #[serde(rename = "newName", default)]
        new_name: String,
    },
    CreateService {
        #[serde(default)]
        uuid: String,
        #[serde(default)]
        primary: bool,
    },
    RemoveService {
        #[serde(default)]
        uuid: String,
    },
    RemoveServices,
    CreateCharacteristic {
        #[serde(default)]
        uuid: String,
        #[serde(default)]
        properties: u32,
        #[serde(default)]
        permissions: u32,
        #[serde(default, with = "base64_bytes")]
        data: Vec<u8>,
    },
    RemoveCharacteristic {
        #[serde(default)]
        uuid: String,
    },
    RemoveCharacteristics,
    StartAdvertising,
    StopAdvertising,
    UpdateCharacteristicValue {
        #[serde(default)]
        uuid: String,
        #[serde(default, with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Command {
    /// Decode one JSON command; an unknown kind or malformed object is an error
    pub fn decode(line: &str) -> EngineResult<Self> {
        serde_json::from_str(line).map_err(|e| EngineError::InvalidCommand(e.to_string()))
    }

    /// Wire name of the command kind
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Initialize { .. } => "Initialize",
            Command::DeInitialize => "DeInitialize",
            Command::ScanForPeripheralsWithServices { .. } => "ScanForPeripheralsWithServices",
            Command::RetrieveListOfPeripheralsWithServices { .. } => {
                "RetrieveListOfPeripheralsWithServices"
            }
            Command::StopScan => "StopScan",
            Command::StopBeaconScan => "StopBeaconScan",
            Command::DisconnectAll => "DisconnectAll",
            Command::ConnectToPeripheral { .. } => "ConnectToPeripheral",
            Command::DisconnectPeripheral { .. } => "DisconnectPeripheral",
            Command::ReadCharacteristic { .. } => "ReadCharacteristic",
            Command::WriteCharacteristic { .. } => "WriteCharacteristic",
            Command::SubscribeCharacteristic { .. } => "SubscribeCharacteristic",
            Command::UnSubscribeCharacteristic { .. } => "UnSubscribeCharacteristic",
            Command::PeripheralName { .. } => "PeripheralName",
            Command::CreateService { .. } => "CreateService",
            Command::RemoveService { .. } => "RemoveService",
            Command::RemoveServices => "RemoveServices",
            Command::CreateCharacteristic { .. } => "CreateCharacteristic",
            Command::RemoveCharacteristic { .. } => "RemoveCharacteristic",
            Command::RemoveCharacteristics => "RemoveCharacteristics",
            Command::StartAdvertising => "StartAdvertising",
            Command::StopAdvertising => "StopAdvertising",
            Command::UpdateCharacteristicValue { .. } => "UpdateCharacteristicValue",
        }
    }

    /// Role required to run the command; `None` for session lifecycle commands
    pub fn role(&self) -> Option<Role> {
        match self {
            Command::Initialize { .. } | Command::DeInitialize => None,
            Command::ScanForPeripheralsWithServices { .. }
            | Command::RetrieveListOfPeripheralsWithServices { .. }
            | Command::StopScan
            | Command::StopBeaconScan
            | Command::DisconnectAll
            | Command::ConnectToPeripheral { .. }
            | Command::DisconnectPeripheral { .. }
            | Command::ReadCharacteristic { .. }
            | Command::WriteCharacteristic { .. }
            | Command::SubscribeCharacteristic { .. }
            | Command::UnSubscribeCharacteristic { .. } => Some(Role::Central),
            Command::PeripheralName { .. }
            | Command::CreateService { .. }
            | Command::RemoveService { .. }
            | Command::RemoveServices
            | Command::CreateCharacteristic { .. }
            | Command::RemoveCharacteristic { .. }
            | Command::RemoveCharacteristics
            | Command::StartAdvertising
            | Command::StopAdvertising
            | Command::UpdateCharacteristicValue { .. } => Some(Role::Peripheral),
        }
    }
}

// ----------------------------------------------------------------------------
// Field Parsing
// ----------------------------------------------------------------------------

/// Build the composite key addressed by a characteristic command
pub fn characteristic_key(
    name: &str,
    service: &str,
    characteristic: &str,
) -> EngineResult<CharacteristicKey> {
    if name.is_empty() {
        return Err(EngineError::InvalidCommand("missing device identifier".into()));
    }
    let service = parse_uuid(service)
        .ok_or_else(|| EngineError::InvalidCommand(format!("bad service UUID {service:?}")))?;
    let characteristic = parse_uuid(characteristic).ok_or_else(|| {
        EngineError::InvalidCommand(format!("bad characteristic UUID {characteristic:?}"))
    })?;
    Ok(CharacteristicKey::new(DeviceId::new(name), service, characteristic))
}

/// Base64 text on the wire, bytes in memory. `null` decodes as empty.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD.decode(text).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scan_command() {
        let command = Command::decode(
            r#"{"command":"ScanForPeripheralsWithServices","serviceUUIDsString":"180D|180F","allowDuplicates":true,"rssiOnly":false,"clearPeripheralList":true}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::ScanForPeripheralsWithServices {
                service_uuids: Some("180D|180F".into()),
                allow_duplicates: true,
                rssi_only: false,
                clear_peripheral_list: true,
            }
        );
        assert_eq!(command.role(), Some(Role::Central));
    }

    #[test]
    fn test_decode_write_with_base64_payload() {
        let command = Command::decode(
            r#"{"command":"WriteCharacteristic","name":"AA:BB","service":"180D","characteristic":"2A39","data":"AQI=","withResponse":true}"#,
        )
        .unwrap();
        match command {
            Command::WriteCharacteristic {
                data,
                with_response,
                ..
            } => {
                assert_eq!(data, vec![1, 2]);
                assert!(with_response);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_decode_fieldless_and_null_fields() {
        assert_eq!(
            Command::decode(r#"{"command":"StopScan"}"#).unwrap(),
            Command::StopScan
        );
        let command =
            Command::decode(r#"{"command":"UpdateCharacteristicValue","uuid":"2A00","data":null}"#)
                .unwrap();
        assert_eq!(
            command,
            Command::UpdateCharacteristicValue {
                uuid: "2A00".into(),
                data: Vec::new(),
            }
        );
        assert_eq!(command.role(), Some(Role::Peripheral));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(matches!(
            Command::decode(r#"{"command":"SendMessage","Message":"hi"}"#),
            Err(EngineError::InvalidCommand(_))
        ));
        assert!(Command::decode("not json").is_err());
    }

    #[test]
    fn test_characteristic_key_parsing() {
        let key = characteristic_key("AA:BB", "180D", "2A37").unwrap();
        assert_eq!(key.device.as_str(), "AA:BB");
        assert!(characteristic_key("AA:BB", "nope", "2A37").is_err());
        assert!(characteristic_key("", "180D", "2A37").is_err());
    }
}
