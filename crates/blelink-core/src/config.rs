//! Engine configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the session engine
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum time to wait for a native connect
    pub connection_timeout: Duration,
    /// Maximum time to wait for a single GATT enumeration, read, write or notify call
    pub gatt_timeout: Duration,
    /// Maximum time to wait when resolving the name of an unnamed advertiser
    pub name_resolution_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            gatt_timeout: Duration::from_secs(10),
            name_resolution_timeout: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set GATT operation timeout
    pub fn with_gatt_timeout(mut self, timeout: Duration) -> Self {
        self.gatt_timeout = timeout;
        self
    }

    /// Set name resolution timeout
    pub fn with_name_resolution_timeout(mut self, timeout: Duration) -> Self {
        self.name_resolution_timeout = timeout;
        self
    }
}
