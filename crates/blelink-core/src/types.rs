//! Identifiers, composite cache keys and wire-level value parsing

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Stable address string identifying a remote device
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Cache Keys
// ----------------------------------------------------------------------------

/// Key of a remote service handle: (device, service UUID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub device: DeviceId,
    pub service: Uuid,
}

/// Key of a remote characteristic handle: (device, service UUID, characteristic UUID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicKey {
    pub device: DeviceId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicKey {
    pub fn new(device: impl Into<DeviceId>, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            device: device.into(),
            service,
            characteristic,
        }
    }

    /// Key of the service this characteristic lives under
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey {
            device: self.device.clone(),
            service: self.service,
        }
    }
}

impl fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device, self.service, self.characteristic)
    }
}

// ----------------------------------------------------------------------------
// GATT Value Types
// ----------------------------------------------------------------------------

/// How a characteristic write is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

impl WriteType {
    pub fn from_response_flag(with_response: bool) -> Self {
        if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }
}

/// Characteristic property bits as carried by the command protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacteristicProperties(u32);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x0001);
    pub const READ: Self = Self(0x0002);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x0004);
    pub const WRITE: Self = Self(0x0008);
    pub const NOTIFY: Self = Self(0x0010);
    pub const INDICATE: Self = Self(0x0020);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x0040);
    pub const EXTENDED_PROPERTIES: Self = Self(0x0080);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Attribute permission bits as carried by the command protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePermissions(u32);

impl AttributePermissions {
    pub const READABLE: Self = Self(0x01);
    pub const WRITEABLE: Self = Self(0x02);
    pub const READ_ENCRYPTION_REQUIRED: Self = Self(0x04);
    pub const WRITE_ENCRYPTION_REQUIRED: Self = Self(0x08);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

// ----------------------------------------------------------------------------
// Wire Parsing
// ----------------------------------------------------------------------------

/// Bluetooth base UUID used to expand 16- and 32-bit short UUIDs
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;

/// Parse a UUID as it appears in commands.
///
/// Accepts the full 128-bit form (with or without braces/hyphens) as well as
/// 16- and 32-bit short forms, which are expanded against the Bluetooth base UUID.
pub fn parse_uuid(value: &str) -> Option<Uuid> {
    let value = value.trim().trim_start_matches('{').trim_end_matches('}');
    match value.len() {
        4 | 8 => u32::from_str_radix(value, 16)
            .ok()
            .map(|short| Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))),
        _ => Uuid::parse_str(value).ok(),
    }
}

/// Parse a pipe-separated UUID list. An empty list is valid; any malformed entry is not.
pub fn parse_uuid_list(value: &str) -> Option<Vec<Uuid>> {
    value
        .split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_uuid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_uuid() {
        let uuid = parse_uuid("6E400001-B5A3-F393-E0A9-E50E24DCCA9E").unwrap();
        assert_eq!(uuid, Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E));
        assert_eq!(parse_uuid("{6e400001-b5a3-f393-e0a9-e50e24dcca9e}"), Some(uuid));
    }

    #[test]
    fn test_default_device_id_is_empty() {
        assert_eq!(DeviceId::default().as_str(), "");
    }

    #[test]
    fn test_parse_short_uuid() {
        let heart_rate = parse_uuid("180D").unwrap();
        assert_eq!(heart_rate.to_string(), "0000180d-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_parse_uuid_list() {
        let list = parse_uuid_list("180D|180F").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(parse_uuid_list("").unwrap(), Vec::<Uuid>::new());
        assert!(parse_uuid_list("180D|not-a-uuid").is_none());
    }

    #[test]
    fn test_property_bits() {
        let props = CharacteristicProperties::from_bits(0x12);
        assert!(props.contains(CharacteristicProperties::READ));
        assert!(props.contains(CharacteristicProperties::NOTIFY));
        assert!(!props.contains(CharacteristicProperties::WRITE));
    }
}
