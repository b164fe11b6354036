//! Command dispatcher
//!
//! [`Engine`] is the single entry point. It owns the current session, assigns every
//! command and adapter callback to a lane, and returns immediately; the lanes do the
//! native work.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::adapter::{AdapterEvent, BleAdapter};
use crate::command::{characteristic_key, Command};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::event::{Event, EventSink};
use crate::lanes::{Lane, LaneScheduler};
use crate::session::{Roles, Session, SessionSnapshot};
use crate::types::{CharacteristicKey, DeviceId};

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

struct EngineInner<A: BleAdapter> {
    adapter: Arc<A>,
    config: EngineConfig,
    events: EventSink,
    session: RwLock<Option<Arc<Session<A>>>>,
    lanes: LaneScheduler,
}

/// The session and command protocol engine
pub struct Engine<A: BleAdapter> {
    inner: Arc<EngineInner<A>>,
}

impl<A: BleAdapter> Clone for Engine<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: BleAdapter> Engine<A> {
    /// Create an engine and the stream of events it will emit
    pub fn new(adapter: Arc<A>, config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, receiver) = EventSink::channel();
        let engine = Self {
            inner: Arc::new(EngineInner {
                adapter,
                config,
                events,
                session: RwLock::new(None),
                lanes: LaneScheduler::new(),
            }),
        };
        (engine, receiver)
    }

    fn current_session(&self) -> Option<Arc<Session<A>>> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_session(&self, session: Option<Arc<Session<A>>>) -> Option<Arc<Session<A>>> {
        let mut current = self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, session)
    }

    pub fn is_initialized(&self) -> bool {
        self.current_session().is_some()
    }

    // ------------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------------

    /// Accept one command. Never blocks; the work runs on the command's lane.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, command: Command) {
        match command {
            Command::Initialize {
                as_central,
                as_peripheral,
            } => self.initialize(Roles {
                central: as_central,
                peripheral: as_peripheral,
            }),
            Command::DeInitialize => {
                let Some(session) = self.replace_session(None) else {
                    tracing::debug!("Ignoring DeInitialize without a session");
                    return;
                };
                self.inner.lanes.submit(Lane::Control, async move {
                    let result = session.handle(Command::DeInitialize).await;
                    session.report("DeInitialize", result);
                });
            }
            command => {
                let Some(session) = self.current_session() else {
                    tracing::debug!("Ignoring {} before Initialize", command.kind());
                    return;
                };
                if let Some(role) = command.role() {
                    if !session.roles().allows(role) {
                        tracing::debug!("Ignoring {}: role {:?} not enabled", command.kind(), role);
                        return;
                    }
                }

                let lane = lane_for(&command);
                self.inner.lanes.submit(lane, async move {
                    let kind = command.kind();
                    let result = session.handle(command).await;
                    session.report(kind, result);
                });
            }
        }
    }

    fn initialize(&self, roles: Roles) {
        let session = Arc::new(Session::new(
            self.inner.adapter.clone(),
            self.inner.config.clone(),
            self.inner.events.clone(),
            roles,
        ));
        tracing::info!(
            "Session initialized (central: {}, peripheral: {})",
            roles.central,
            roles.peripheral
        );
        session.emit(Event::Initialized);

        if let Some(previous) = self.replace_session(Some(session)) {
            previous.deactivate();
            self.inner.lanes.submit(Lane::Control, async move {
                previous.retire().await;
            });
        }
    }

    /// Accept one native callback, routed to the lane of the resource it concerns
    pub fn handle_adapter_event(&self, event: AdapterEvent) {
        let Some(session) = self.current_session() else {
            tracing::trace!("Dropping adapter event without a session");
            return;
        };

        let lane = match &event {
            AdapterEvent::Advertisement(advertisement) => {
                Lane::Advertisement(advertisement.device.clone())
            }
            AdapterEvent::Disconnected(device) => Lane::Device(device.clone()),
            AdapterEvent::ValueChanged {
                device,
                service,
                characteristic,
                ..
            } => Lane::Characteristic(CharacteristicKey::new(
                device.clone(),
                *service,
                *characteristic,
            )),
        };

        self.inner.lanes.submit(lane, async move {
            let result = session.handle_adapter_event(event).await;
            session.report("Adapter event", result);
        });
    }

    /// Wait until every queued command and callback has been handled
    pub async fn wait_idle(&self) {
        self.inner.lanes.wait_idle().await;
    }

    /// Bookkeeping of the current session, if any
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let session = self.current_session()?;
        Some(session.snapshot().await)
    }

    // ------------------------------------------------------------------------
    // Run Loop
    // ------------------------------------------------------------------------

    /// Drive the engine from a command stream and the adapter's callback stream.
    ///
    /// Returns once the command stream ends, after de-initializing and draining all lanes.
    pub async fn run(
        &self,
        mut commands: mpsc::Receiver<Command>,
        mut adapter_events: mpsc::Receiver<AdapterEvent>,
    ) -> EngineResult<()> {
        tracing::info!("Engine starting");
        let mut adapter_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        tracing::debug!("Received command {}", command.kind());
                        self.dispatch(command);
                    }
                    None => {
                        tracing::info!("Command stream closed");
                        self.dispatch(Command::DeInitialize);
                        break;
                    }
                },
                event = adapter_events.recv(), if adapter_open => match event {
                    Some(event) => self.handle_adapter_event(event),
                    None => {
                        tracing::warn!("Adapter event stream closed");
                        adapter_open = false;
                    }
                },
            }
        }

        self.wait_idle().await;
        tracing::info!("Engine stopped");
        Ok(())
    }
}

/// Lane a command is serialized on
pub fn lane_for(command: &Command) -> Lane {
    match command {
        Command::ConnectToPeripheral { name } | Command::DisconnectPeripheral { name } => {
            Lane::Device(DeviceId::new(name.clone()))
        }
        Command::ReadCharacteristic {
            name,
            service,
            characteristic,
        }
        | Command::WriteCharacteristic {
            name,
            service,
            characteristic,
            ..
        }
        | Command::SubscribeCharacteristic {
            name,
            service,
            characteristic,
        }
        | Command::UnSubscribeCharacteristic {
            name,
            service,
            characteristic,
        } => match characteristic_key(name, service, characteristic) {
            Ok(key) => Lane::Characteristic(key),
            // Rejected by the handler
            Err(_) => Lane::Control,
        },
        Command::PeripheralName { .. }
        | Command::CreateService { .. }
        | Command::RemoveService { .. }
        | Command::RemoveServices
        | Command::CreateCharacteristic { .. }
        | Command::RemoveCharacteristic { .. }
        | Command::RemoveCharacteristics
        | Command::StartAdvertising
        | Command::StopAdvertising
        | Command::UpdateCharacteristicValue { .. } => Lane::Peripheral,
        Command::Initialize { .. }
        | Command::DeInitialize
        | Command::ScanForPeripheralsWithServices { .. }
        | Command::RetrieveListOfPeripheralsWithServices { .. }
        | Command::StopScan
        | Command::StopBeaconScan
        | Command::DisconnectAll => Lane::Control,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_commands_share_a_lane() {
        let read = Command::ReadCharacteristic {
            name: "AA:BB".into(),
            service: "180D".into(),
            characteristic: "2A37".into(),
        };
        let subscribe = Command::SubscribeCharacteristic {
            name: "AA:BB".into(),
            service: "0000180d-0000-1000-8000-00805f9b34fb".into(),
            characteristic: "2a37".into(),
        };
        assert_eq!(lane_for(&read), lane_for(&subscribe));
        assert!(matches!(lane_for(&read), Lane::Characteristic(_)));
    }

    #[test]
    fn test_lane_assignment() {
        assert_eq!(
            lane_for(&Command::ConnectToPeripheral {
                name: "AA:BB".into()
            }),
            Lane::Device("AA:BB".into())
        );
        assert_eq!(lane_for(&Command::StartAdvertising), Lane::Peripheral);
        assert_eq!(lane_for(&Command::DisconnectAll), Lane::Control);

        let malformed = Command::ReadCharacteristic {
            name: "AA:BB".into(),
            service: "bogus".into(),
            characteristic: "2A37".into(),
        };
        assert_eq!(lane_for(&malformed), Lane::Control);
    }
}
