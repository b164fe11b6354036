//! BLE session and command protocol engine
//!
//! This crate bridges a host application to a platform Bluetooth Low Energy stack. It
//! accepts structured [`Command`]s, drives the native stack through the [`BleAdapter`]
//! trait, and reports everything that happens as an ordered stream of [`Event`]s encoded
//! as `Kind~field~...` messages.
//!
//! ## Architecture
//!
//! - [`adapter`] - The native stack seam and its callback events
//! - [`command`] - Inbound command protocol
//! - [`event`] - Outbound events and their encoding
//! - [`dispatcher`] - The [`Engine`] entry point and lane assignment
//! - [`lanes`] - Per-key serialized execution
//! - [`session`] - State owned between `Initialize` and `DeInitialize`
//! - [`discovery`], [`connection`], [`gatt_cache`], [`subscription`], [`peripheral`] -
//!   The components operating on that state
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blelink_core::{BleAdapter, Command, Engine, EngineConfig};
//!
//! # async fn example<A: BleAdapter>(adapter: A) {
//! let (engine, mut events) = Engine::new(Arc::new(adapter), EngineConfig::default());
//!
//! engine.dispatch(Command::Initialize { as_central: true, as_peripheral: false });
//! engine.dispatch(Command::decode(r#"{"command":"StopScan"}"#).unwrap());
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.encode());
//! }
//! # }
//! ```

pub mod adapter;
pub mod command;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gatt_cache;
pub mod lanes;
pub mod peripheral;
pub mod session;
pub mod subscription;
pub mod types;

// Public API exports
pub use adapter::{
    AdapterEvent, AdvertisingParameters, Advertisement, BleAdapter, GattHandle,
    LocalCharacteristicSpec, RetrievedDevice,
};
pub use command::{Command, Role};
pub use config::EngineConfig;
pub use dispatcher::Engine;
pub use error::{AdapterResult, EngineError, EngineResult, GattStatus};
pub use event::{Event, EventSink, SignalReport};
pub use lanes::{Lane, LaneScheduler};
pub use session::{Roles, SessionSnapshot};
pub use types::{
    parse_uuid, parse_uuid_list, AttributePermissions, CharacteristicKey,
    CharacteristicProperties, DeviceId, ServiceKey, WriteType,
};
