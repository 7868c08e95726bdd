use chrono::{DateTime, Utc};
use std::fmt;

/// Reserved id meaning "no device selected".
pub const UNKNOWN_DEVICE_ID: &str = "-";

/// A single accepted heart-rate reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateSample {
    pub time: DateTime<Utc>,
    /// Beats per minute
    pub rate: u16,
}

/// Stable identifier of a heart-rate sensor as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_DEVICE_ID.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_DEVICE_ID || self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Device connection lifecycle. Exactly one variant is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected { device_id: DeviceId },
    Connecting { device_id: DeviceId },
    Connected { device_id: DeviceId },
}

impl ConnectionState {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::Disconnected { device_id }
            | Self::Connecting { device_id }
            | Self::Connected { device_id } => device_id,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected { .. } => "Disconnected",
            Self::Connecting { .. } => "Connecting...",
            Self::Connected { .. } => "Connected",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected {
            device_id: DeviceId::unknown(),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.device_id())
    }
}

/// Inbound notifications from the BLE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting(DeviceId),
    Connected(DeviceId),
    Disconnected(DeviceId),
    BluetoothPowered(bool),
}

/// Chart axis bounds in bpm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleRange {
    pub lower: i32,
    pub upper: i32,
}

/// UI affordance of a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Disabled,
    Released,
    PressedDown,
}

/// Outbound notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    HeartRate(HeartRateSample),
    ConnectionState(ConnectionState),
    BroadcastActive(bool),
    LogMessage(StatusMessage),
    /// User-visible alert
    GeneralMessage(String),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
