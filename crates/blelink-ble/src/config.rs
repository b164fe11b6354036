//! Backend configuration

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the native BLE backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Index of the host adapter to use, in the order the platform lists them
    pub adapter_index: usize,
    /// Capacity of the native callback channel feeding the engine
    pub event_buffer_size: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            event_buffer_size: 256,
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the host adapter
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the callback channel capacity; clamped to at least one slot
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size.max(1);
        self
    }
}
