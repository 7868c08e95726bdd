use crate::domain::error::{PersistenceError, SessionError};
use crate::domain::models::{ConnectionState, HeartRateSample};
use crate::domain::recording::{LineFormat, SampleLog};
use crate::domain::samples::SampleStream;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Result of feeding one reading through an active session.
#[derive(Debug)]
pub struct Recorded {
    pub sample: HeartRateSample,
    /// The sample stays in the history even when the log write fails.
    pub log_error: Option<PersistenceError>,
}

/// Gates sample ingestion and the append log.
pub struct BroadcastSession {
    active: bool,
    log: Box<dyn SampleLog>,
    format: LineFormat,
}

impl BroadcastSession {
    pub fn new(log: Box<dyn SampleLog>, format: LineFormat) -> Self {
        Self {
            active: false,
            log,
            format,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn format(&self) -> &LineFormat {
        &self.format
    }

    /// Clears `stream` and opens the append log. A log that fails to open is
    /// reported but does not prevent the session from starting.
    pub fn start(
        &mut self,
        connection: &ConnectionState,
        bluetooth_enabled: bool,
        stream: &mut SampleStream,
    ) -> Result<Option<PersistenceError>, SessionError> {
        if self.active {
            return Err(SessionError::ignored("start broadcast", "already active"));
        }
        if !connection.is_connected() {
            return Err(SessionError::ignored(
                "start broadcast",
                format!("device is {}", connection),
            ));
        }
        if !bluetooth_enabled {
            return Err(SessionError::ignored("start broadcast", "bluetooth is off"));
        }

        stream.reset();
        self.active = true;
        info!("Broadcast listening started for {}", connection.device_id());

        let log_error = self.log.begin().err();
        if let Some(err) = &log_error {
            warn!("Could not open heart rate log: {}", err);
        }
        Ok(log_error)
    }

    /// The history is kept until the next `start`.
    pub fn stop(&mut self) -> Result<Option<PersistenceError>, SessionError> {
        if !self.active {
            return Err(SessionError::ignored("stop broadcast", "not active"));
        }
        self.active = false;
        info!("Broadcast listening stopped");

        let log_error = self.log.end().err();
        if let Some(err) = &log_error {
            warn!("Could not close heart rate log: {}", err);
        }
        Ok(log_error)
    }

    /// `Ok(None)` when no session is active.
    pub fn on_tick(
        &mut self,
        stream: &mut SampleStream,
        rate: u16,
        time: DateTime<Utc>,
    ) -> Result<Option<Recorded>, SessionError> {
        if !self.active {
            return Ok(None);
        }
        let sample = stream.append(rate, time)?;

        let line = self.format.format(&sample);
        let log_error = self.log.append_line(&line).err();
        if let Some(err) = &log_error {
            warn!("Could not append heart rate sample: {}", err);
        }
        Ok(Some(Recorded { sample, log_error }))
    }
}
