//! Heart-rate transport
//!
//! The vendor BLE SDK is reached only through [`HeartRateTransport`]. Requests
//! (connect, disconnect, auto-connect) return immediately; their outcome
//! arrives later as [`TransportEvent`]s on the channel handed to the session
//! service.
//!
//! ```text
//! ┌──────────────────┐  requests   ┌───────────────────┐
//! │  SessionService  │ ──────────▶ │ HeartRateTransport│
//! │  (single owner)  │ ◀────────── │  (vendor SDK)     │
//! └──────────────────┘   events    └───────────────────┘
//! ```
//!
//! [`TransportEvent`]: crate::domain::models::TransportEvent

pub mod simulated;

pub use simulated::{SimulatedDevice, SimulatedTransport};

use crate::domain::models::DeviceId;
use anyhow::Result;
use std::future::Future;

pub trait HeartRateTransport: Send + 'static {
    fn bluetooth_enabled(&self) -> bool;

    fn connect(&mut self, device_id: &DeviceId) -> Result<()>;

    /// Connect to whichever device the transport finds first.
    fn auto_connect(&mut self) -> Result<()>;

    fn disconnect(&mut self, device_id: &DeviceId) -> Result<()>;

    /// Latest heart rate reported by the connected sensor.
    fn current_heart_rate(&self) -> impl Future<Output = Option<u16>> + Send;
}
