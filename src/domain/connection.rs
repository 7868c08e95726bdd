//! Device connection lifecycle.
//!
//! Requests originate from the user (connect, disconnect, device selection);
//! events originate from the transport (attempt started, established, lost).
//! Anything arriving in the wrong state is rejected without changing state.

use crate::domain::error::SessionError;
use crate::domain::models::{ButtonState, ConnectionState, DeviceId};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Remember the device to connect to. Only meaningful while disconnected.
    pub fn select_device(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        match &self.state {
            ConnectionState::Disconnected { .. } => {
                debug!("Selected device {}", device_id);
                self.state = ConnectionState::Disconnected { device_id };
                Ok(())
            }
            other => Err(SessionError::ignored(
                "select device",
                format!("already {}", other),
            )),
        }
    }

    pub fn request_connect(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        if device_id.is_unknown() {
            return Err(SessionError::ignored("connect", "no device selected"));
        }
        match &self.state {
            ConnectionState::Disconnected { .. } => {
                info!("Connecting to {}", device_id);
                self.state = ConnectionState::Connecting { device_id };
                Ok(())
            }
            other => Err(SessionError::ignored("connect", format!("already {}", other))),
        }
    }

    /// The transport started connecting on its own (auto-connect) or in
    /// response to our request.
    pub fn connection_attempt_started(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        match &self.state {
            ConnectionState::Disconnected { .. } if !device_id.is_unknown() => {
                info!("Transport is connecting to {}", device_id);
                self.state = ConnectionState::Connecting { device_id };
                Ok(())
            }
            ConnectionState::Connecting { device_id: current } if *current == device_id => Ok(()),
            _ => Err(self.inconsistent("connecting", device_id)),
        }
    }

    pub fn connection_established(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        match &self.state {
            ConnectionState::Connecting { device_id: current } if *current == device_id => {
                info!("Connected to {}", device_id);
                self.state = ConnectionState::Connected { device_id };
                Ok(())
            }
            _ => Err(self.inconsistent("connected", device_id)),
        }
    }

    /// Returns the device that was disconnected.
    pub fn request_disconnect(&mut self) -> Result<DeviceId, SessionError> {
        match &self.state {
            ConnectionState::Connected { device_id } => {
                let device_id = device_id.clone();
                info!("Disconnecting from {}", device_id);
                self.state = ConnectionState::default();
                Ok(device_id)
            }
            other => Err(SessionError::ignored("disconnect", format!("currently {}", other))),
        }
    }

    /// Abnormal drop: radio off, device out of range or transport failure.
    pub fn connection_lost(&mut self) -> Result<DeviceId, SessionError> {
        match &self.state {
            ConnectionState::Connecting { device_id } | ConnectionState::Connected { device_id } => {
                let device_id = device_id.clone();
                warn!("Connection to {} lost", device_id);
                self.state = ConnectionState::default();
                Ok(device_id)
            }
            ConnectionState::Disconnected { device_id } => {
                Err(self.inconsistent("disconnected", device_id.clone()))
            }
        }
    }

    pub fn can_connect(&self, bluetooth_enabled: bool) -> bool {
        bluetooth_enabled
            && matches!(&self.state, ConnectionState::Disconnected { device_id } if !device_id.is_unknown())
    }

    pub fn can_disconnect(&self, bluetooth_enabled: bool) -> bool {
        bluetooth_enabled && self.state.is_connected()
    }

    pub fn can_auto_connect(&self, bluetooth_enabled: bool) -> bool {
        bluetooth_enabled && self.state.is_disconnected()
    }

    pub fn connect_button_state(&self, bluetooth_enabled: bool) -> ButtonState {
        if !bluetooth_enabled {
            return ButtonState::Disabled;
        }
        match &self.state {
            ConnectionState::Disconnected { device_id } if device_id.is_unknown() => {
                ButtonState::Disabled
            }
            ConnectionState::Disconnected { .. } => ButtonState::Released,
            ConnectionState::Connecting { .. } => ButtonState::Disabled,
            ConnectionState::Connected { .. } => ButtonState::PressedDown,
        }
    }

    pub fn auto_connect_button_state(&self, bluetooth_enabled: bool) -> ButtonState {
        if self.can_auto_connect(bluetooth_enabled) {
            ButtonState::Released
        } else {
            ButtonState::Disabled
        }
    }

    fn inconsistent(&self, event: &'static str, device: DeviceId) -> SessionError {
        warn!("Ignoring {} event for {} while {}", event, device, self.state);
        SessionError::InconsistentEvent {
            event,
            device,
            state: self.state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(id: &str) -> ConnectionStateMachine {
        let mut machine = ConnectionStateMachine::new();
        machine.request_connect(id.into()).unwrap();
        machine.connection_established(id.into()).unwrap();
        machine
    }

    #[test]
    fn test_initial_state_is_disconnected_sentinel() {
        let machine = ConnectionStateMachine::new();
        assert!(machine.state().is_disconnected());
        assert!(machine.state().device_id().is_unknown());
    }

    #[test]
    fn test_connect_lifecycle() {
        let mut machine = ConnectionStateMachine::new();
        machine.request_connect("X".into()).unwrap();
        assert_eq!(
            machine.state(),
            &ConnectionState::Connecting {
                device_id: "X".into()
            }
        );

        machine.connection_established("X".into()).unwrap();
        assert_eq!(
            machine.state(),
            &ConnectionState::Connected {
                device_id: "X".into()
            }
        );

        assert_eq!(machine.connection_lost().unwrap(), DeviceId::from("X"));
        assert_eq!(machine.state(), &ConnectionState::default());
    }

    #[test]
    fn test_sentinel_connect_is_ignored() {
        let mut machine = ConnectionStateMachine::new();
        let err = machine.request_connect(DeviceId::unknown()).unwrap_err();
        assert!(matches!(err, SessionError::IgnoredRequest { .. }));
        assert!(machine.state().is_disconnected());
    }

    #[test]
    fn test_connect_while_connecting_is_ignored() {
        let mut machine = ConnectionStateMachine::new();
        machine.request_connect("X".into()).unwrap();
        let err = machine.request_connect("Y".into()).unwrap_err();
        assert!(matches!(err, SessionError::IgnoredRequest { .. }));
        assert_eq!(machine.state().device_id(), &DeviceId::from("X"));
    }

    #[test]
    fn test_established_while_disconnected_is_inconsistent() {
        let mut machine = ConnectionStateMachine::new();
        let err = machine.connection_established("X".into()).unwrap_err();
        assert!(matches!(err, SessionError::InconsistentEvent { .. }));
        assert_eq!(machine.state(), &ConnectionState::default());
    }

    #[test]
    fn test_established_for_other_device_is_inconsistent() {
        let mut machine = ConnectionStateMachine::new();
        machine.request_connect("X".into()).unwrap();
        assert!(machine.connection_established("Y".into()).is_err());
        assert!(machine.state().is_connecting());
    }

    #[test]
    fn test_disconnect_only_from_connected() {
        let mut machine = ConnectionStateMachine::new();
        assert!(machine.request_disconnect().is_err());

        machine.request_connect("X".into()).unwrap();
        assert!(machine.request_disconnect().is_err());
        assert!(machine.state().is_connecting());

        machine.connection_established("X".into()).unwrap();
        assert_eq!(machine.request_disconnect().unwrap(), DeviceId::from("X"));
        assert!(machine.state().device_id().is_unknown());
    }

    #[test]
    fn test_lost_while_connecting() {
        let mut machine = ConnectionStateMachine::new();
        machine.request_connect("X".into()).unwrap();
        machine.connection_lost().unwrap();
        assert_eq!(machine.state(), &ConnectionState::default());
    }

    #[test]
    fn test_lost_while_disconnected_is_rejected() {
        let mut machine = ConnectionStateMachine::new();
        assert!(machine.connection_lost().is_err());
    }

    #[test]
    fn test_attempt_started_by_transport() {
        let mut machine = ConnectionStateMachine::new();
        machine.connection_attempt_started("H10".into()).unwrap();
        assert!(machine.state().is_connecting());
        // Echo of our own request
        machine.connection_attempt_started("H10".into()).unwrap();
        assert!(machine.connection_attempt_started("OTHER".into()).is_err());
    }

    #[test]
    fn test_select_device_only_while_disconnected() {
        let mut machine = ConnectionStateMachine::new();
        machine.select_device("A".into()).unwrap();
        assert_eq!(machine.state().device_id(), &DeviceId::from("A"));

        let mut machine = connected("B");
        assert!(machine.select_device("A".into()).is_err());
    }

    #[test]
    fn test_queries() {
        let mut machine = ConnectionStateMachine::new();
        assert!(!machine.can_connect(true));
        assert!(machine.can_auto_connect(true));
        assert!(!machine.can_auto_connect(false));

        machine.select_device("A".into()).unwrap();
        assert!(machine.can_connect(true));
        assert!(!machine.can_connect(false));

        let machine = connected("A");
        assert!(!machine.can_connect(true));
        assert!(machine.can_disconnect(true));
        assert!(!machine.can_disconnect(false));
        assert!(!machine.can_auto_connect(true));
    }

    #[test]
    fn test_button_states() {
        let mut machine = ConnectionStateMachine::new();
        assert_eq!(machine.connect_button_state(true), ButtonState::Disabled);
        machine.select_device("A".into()).unwrap();
        assert_eq!(machine.connect_button_state(true), ButtonState::Released);
        assert_eq!(machine.connect_button_state(false), ButtonState::Disabled);

        machine.request_connect("A".into()).unwrap();
        assert_eq!(machine.connect_button_state(true), ButtonState::Disabled);
        assert_eq!(machine.auto_connect_button_state(true), ButtonState::Disabled);

        machine.connection_established("A".into()).unwrap();
        assert_eq!(machine.connect_button_state(true), ButtonState::PressedDown);
    }
}
