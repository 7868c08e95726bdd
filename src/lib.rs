//! Heart-rate monitoring session core.
//!
//! Tracks the connection to a BLE heart-rate sensor, gates recording of its
//! readings into a time-ordered history and an append-only text log, and
//! exposes the whole session through [`controller::SessionController`] and
//! its actor wrapper [`infrastructure::session_service::SessionService`].

pub mod controller;
pub mod domain;
pub mod infrastructure;
