//! Error types for the native backend

use blelink_core::GattStatus;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while bringing the backend up
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Bluetooth stack error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    Bluer(#[from] bluer::Error),
}

// ----------------------------------------------------------------------------
// Status Mapping
// ----------------------------------------------------------------------------

/// Map a central-role failure onto the status reported to the host
pub fn status_from_btleplug(error: &btleplug::Error) -> GattStatus {
    match error {
        btleplug::Error::PermissionDenied => GattStatus::AccessDenied,
        btleplug::Error::DeviceNotFound | btleplug::Error::NotConnected => GattStatus::Unreachable,
        btleplug::Error::NotSupported(_) => GattStatus::NotSupported,
        btleplug::Error::TimedOut(_) => GattStatus::Timeout,
        btleplug::Error::UnexpectedCallback
        | btleplug::Error::UnexpectedCharacteristic
        | btleplug::Error::NoSuchCharacteristic => GattStatus::ProtocolError,
        other => GattStatus::Other(other.to_string()),
    }
}

/// Map a peripheral-role failure onto the status reported to the host
#[cfg(target_os = "linux")]
pub fn status_from_bluer(error: &bluer::Error) -> GattStatus {
    use bluer::ErrorKind;

    match &error.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => GattStatus::AccessDenied,
        ErrorKind::NotSupported => GattStatus::NotSupported,
        ErrorKind::NotReady | ErrorKind::NotAvailable | ErrorKind::DoesNotExist => {
            GattStatus::Unreachable
        }
        _ => GattStatus::Other(error.to_string()),
    }
}
