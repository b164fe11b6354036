//! Native Bluetooth Low Energy backend for blelink
//!
//! This crate provides [`BleBackend`], an implementation of the engine's
//! [`BleAdapter`](blelink_core::BleAdapter) seam on top of the host's Bluetooth stack.
//!
//! ## Architecture
//!
//! - [`config`] - Adapter selection and callback buffering
//! - [`error`] - Backend errors and native status mapping
//! - [`central`] - Scanning, connections and remote GATT via btleplug
//! - [`peripheral`] - Local GATT services and advertising per platform
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blelink_ble::{BackendConfig, BleBackend};
//! use blelink_core::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (backend, adapter_events) = BleBackend::new(&BackendConfig::default()).await?;
//! let (engine, mut events) = Engine::new(Arc::new(backend), EngineConfig::default());
//! # let _ = (engine, adapter_events, events.recv().await);
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Central role**: every platform btleplug supports
//! - **Peripheral role**: Linux via `bluer` and BlueZ; elsewhere local service
//!   operations fail with `NotSupported`

pub mod central;
pub mod config;
pub mod error;
pub mod peripheral;

// Public API exports
pub use central::{BleBackend, RemoteCharacteristic, RemoteDevice, RemoteService};
pub use config::BackendConfig;
pub use error::{status_from_btleplug, BackendError};
pub use peripheral::{GattServer, LocalServiceHandle, PlatformServer};
