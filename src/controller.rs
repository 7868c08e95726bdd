//! Session facade.
//!
//! All mutations of the connection lifecycle, sample history and broadcast
//! gate go through [`SessionController`]. It is synchronous and owns no
//! timers; the periodic tick and transport I/O live in
//! [`crate::infrastructure::session_service`].

use crate::domain::broadcast::{BroadcastSession, Recorded};
use crate::domain::connection::ConnectionStateMachine;
use crate::domain::error::{PersistenceError, SessionError};
use crate::domain::models::{
    ButtonState, ConnectionState, DeviceId, HeartRateSample, ScaleRange, TransportEvent,
};
use crate::domain::recording::{LineFormat, SampleLog};
use crate::domain::samples::SampleStream;
use crate::domain::settings::SessionSettings;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum TickOutcome {
    /// No broadcast session is active.
    Idle,
    /// The transport had no reading.
    NoReading,
    Recorded(Recorded),
}

#[derive(Debug)]
pub struct BroadcastToggle {
    pub active: bool,
    pub log_error: Option<PersistenceError>,
}

/// Read-only copy of the session for the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub bluetooth_enabled: bool,
    pub broadcast_active: bool,
    pub samples: Vec<HeartRateSample>,
    pub scale: ScaleRange,
    pub live_heart_rate: Option<u16>,
    pub connect_button: ButtonState,
    pub broadcast_button: ButtonState,
    pub auto_connect_button: ButtonState,
}

pub struct SessionController {
    connection: ConnectionStateMachine,
    stream: SampleStream,
    broadcast: BroadcastSession,
    bluetooth_enabled: bool,
}

impl SessionController {
    pub fn new(
        settings: &SessionSettings,
        log: Box<dyn SampleLog>,
        format: LineFormat,
        bluetooth_enabled: bool,
    ) -> Self {
        Self {
            connection: ConnectionStateMachine::new(),
            stream: SampleStream::new(settings),
            broadcast: BroadcastSession::new(log, format),
            bluetooth_enabled,
        }
    }

    pub fn select_device(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        self.connection.select_device(device_id)
    }

    pub fn connect(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        if !self.bluetooth_enabled {
            return Err(SessionError::ignored("connect", "bluetooth is off"));
        }
        self.connection.request_connect(device_id)
    }

    /// Succeeds when the transport may start searching for the nearest
    /// device; the state changes once it reports the attempt.
    pub fn auto_connect(&mut self) -> Result<(), SessionError> {
        if !self.connection.can_auto_connect(self.bluetooth_enabled) {
            return Err(SessionError::ignored(
                "auto connect",
                if self.bluetooth_enabled {
                    format!("device is {}", self.connection.state())
                } else {
                    "bluetooth is off".to_string()
                },
            ));
        }
        Ok(())
    }

    /// Stops an active broadcast first.
    pub fn disconnect(&mut self) -> Result<DeviceId, SessionError> {
        let device_id = self.connection.request_disconnect()?;
        self.stop_broadcast_quietly();
        Ok(device_id)
    }

    /// The transport rejected a connect request.
    pub fn connect_failed(&mut self, reason: impl Into<String>) -> SessionError {
        let device = self.connection.state().device_id().clone();
        if self.connection.state().is_connecting() {
            if let Err(e) = self.connection.connection_lost() {
                debug!("{}", e);
            }
        }
        SessionError::ConnectionFailed {
            device,
            reason: reason.into(),
        }
    }

    pub fn toggle_broadcast(&mut self) -> Result<BroadcastToggle, SessionError> {
        if self.broadcast.is_active() {
            let log_error = self.broadcast.stop()?;
            Ok(BroadcastToggle {
                active: false,
                log_error,
            })
        } else {
            let log_error = self.broadcast.start(
                self.connection.state(),
                self.bluetooth_enabled,
                &mut self.stream,
            )?;
            Ok(BroadcastToggle {
                active: true,
                log_error,
            })
        }
    }

    /// Late ticks after a session stopped are `Idle`, not errors.
    pub fn tick(
        &mut self,
        rate: Option<u16>,
        time: DateTime<Utc>,
    ) -> Result<TickOutcome, SessionError> {
        if !self.broadcast.is_active() {
            return Ok(TickOutcome::Idle);
        }
        let Some(rate) = rate else {
            debug!("No heart rate reading at {}", time);
            return Ok(TickOutcome::NoReading);
        };
        match self.broadcast.on_tick(&mut self.stream, rate, time)? {
            Some(recorded) => Ok(TickOutcome::Recorded(recorded)),
            None => Ok(TickOutcome::Idle),
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::Connecting(device_id) => {
                self.connection.connection_attempt_started(device_id)
            }
            TransportEvent::Connected(device_id) => {
                self.connection.connection_established(device_id)
            }
            TransportEvent::Disconnected(device_id) => {
                if self.connection.state().is_disconnected() {
                    // Echo of a requested disconnect.
                    debug!("Transport confirmed disconnect of {}", device_id);
                    return Ok(());
                }
                if self.connection.state().device_id() != &device_id {
                    return Err(SessionError::InconsistentEvent {
                        event: "disconnected",
                        device: device_id,
                        state: self.connection.state().to_string(),
                    });
                }
                Err(self.drop_connection("device disconnected"))
            }
            TransportEvent::BluetoothPowered(enabled) => {
                info!("Bluetooth {}", if enabled { "on" } else { "off" });
                self.bluetooth_enabled = enabled;
                if !enabled && !self.connection.state().is_disconnected() {
                    return Err(self.drop_connection("bluetooth turned off"));
                }
                Ok(())
            }
        }
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    pub fn bluetooth_enabled(&self) -> bool {
        self.bluetooth_enabled
    }

    pub fn is_broadcasting(&self) -> bool {
        self.broadcast.is_active()
    }

    pub fn history(&self) -> impl Iterator<Item = &HeartRateSample> + '_ {
        self.stream.iter()
    }

    pub fn dynamic_scale(&self) -> ScaleRange {
        self.stream.dynamic_scale()
    }

    pub fn nearest_to(&self, time: DateTime<Utc>) -> Option<&HeartRateSample> {
        self.stream.nearest_to(time)
    }

    pub fn line_format(&self) -> &LineFormat {
        self.broadcast.format()
    }

    /// Latest reading while connected and broadcasting.
    pub fn live_heart_rate(&self) -> Option<u16> {
        if self.connection.state().is_connected() && self.broadcast.is_active() {
            self.stream.latest().map(|sample| sample.rate)
        } else {
            None
        }
    }

    pub fn can_connect(&self) -> bool {
        self.connection.can_connect(self.bluetooth_enabled)
    }

    pub fn can_disconnect(&self) -> bool {
        self.connection.can_disconnect(self.bluetooth_enabled)
    }

    pub fn can_auto_connect(&self) -> bool {
        self.connection.can_auto_connect(self.bluetooth_enabled)
    }

    pub fn connect_button_state(&self) -> ButtonState {
        self.connection.connect_button_state(self.bluetooth_enabled)
    }

    pub fn broadcast_button_state(&self) -> ButtonState {
        if !self.bluetooth_enabled || !self.connection.state().is_connected() {
            ButtonState::Disabled
        } else if self.broadcast.is_active() {
            ButtonState::PressedDown
        } else {
            ButtonState::Released
        }
    }

    pub fn auto_connect_button_state(&self) -> ButtonState {
        self.connection.auto_connect_button_state(self.bluetooth_enabled)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection.state().clone(),
            bluetooth_enabled: self.bluetooth_enabled,
            broadcast_active: self.broadcast.is_active(),
            samples: self.stream.iter().copied().collect(),
            scale: self.stream.dynamic_scale(),
            live_heart_rate: self.live_heart_rate(),
            connect_button: self.connect_button_state(),
            broadcast_button: self.broadcast_button_state(),
            auto_connect_button: self.auto_connect_button_state(),
        }
    }

    fn drop_connection(&mut self, reason: &str) -> SessionError {
        let was_connected = self.connection.state().is_connected();
        self.stop_broadcast_quietly();
        match self.connection.connection_lost() {
            Ok(device) if was_connected => SessionError::ConnectionLost(device),
            Ok(device) => SessionError::ConnectionFailed {
                device,
                reason: reason.to_string(),
            },
            Err(err) => err,
        }
    }

    fn stop_broadcast_quietly(&mut self) {
        if !self.broadcast.is_active() {
            return;
        }
        match self.broadcast.stop() {
            Ok(Some(err)) => warn!("Heart rate log not closed cleanly: {}", err),
            Ok(None) => {}
            Err(err) => debug!("{}", err),
        }
    }
}
