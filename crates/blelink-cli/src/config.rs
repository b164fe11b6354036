//! Bridge configuration
//!
//! Everything is optional: a missing file section or key falls back to its default.
//!
//! ```toml
//! [engine.connection_timeout]
//! secs = 15
//! nanos = 0
//!
//! [backend]
//! adapter_index = 1
//!
//! [log]
//! level = "blelink_core=debug,info"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use blelink_ble::BackendConfig;
use blelink_core::EngineConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Engine timeouts
    pub engine: EngineConfig,
    /// Host adapter selection
    pub backend: BackendConfig,
    /// Logging output
    pub log: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Colorize log output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading
// ----------------------------------------------------------------------------

impl CliConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CliConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.connection_timeout.is_zero() || engine.gatt_timeout.is_zero() {
            return Err(CliError::Config(
                "connection and GATT timeouts must be non-zero".to_string(),
            ));
        }
        if self.backend.event_buffer_size == 0 {
            return Err(CliError::Config(
                "backend.event_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
