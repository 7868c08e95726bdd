pub mod clock;
pub mod logging;
pub mod recording;
pub mod session_service;
pub mod transport;
