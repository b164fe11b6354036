//! Error types for the engine

use thiserror::Error;

// ----------------------------------------------------------------------------
// Native Status
// ----------------------------------------------------------------------------

/// Non-success status reported by the native BLE adapter.
///
/// The `Display` form is the status code carried by `Error~<status>` events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattStatus {
    #[error("Unreachable")]
    Unreachable,

    #[error("ProtocolError")]
    ProtocolError,

    #[error("AccessDenied")]
    AccessDenied,

    #[error("Timeout")]
    Timeout,

    #[error("NotSupported")]
    NotSupported,

    #[error("{0}")]
    Other(String),
}

/// Result of a native adapter call
pub type AdapterResult<T> = Result<T, GattStatus>;

// ----------------------------------------------------------------------------
// Engine Errors
// ----------------------------------------------------------------------------

/// Errors produced while handling a command or adapter event
#[derive(Error, Debug)]
pub enum EngineError {
    /// The adapter rejected a native call; surfaced to the host as `Error~<status>`
    #[error("Native adapter failure: {0}")]
    Native(#[from] GattStatus),

    /// The command does not apply to the current state; dropped without reply
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// The command carried malformed fields; dropped without reply
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Event channel closed")]
    ChannelClosed,
}

impl EngineError {
    /// Whether this error is reported to the host rather than only logged
    pub fn is_reported(&self) -> bool {
        matches!(self, EngineError::Native(_))
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
