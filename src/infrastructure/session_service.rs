//! Session Service Module
//!
//! Runs the [`SessionController`] as a single-owner actor. Commands from
//! [`SessionHandle`]s, transport events and the periodic sampling tick are
//! applied one at a time in arrival order. The tick is armed while a broadcast
//! session is active and dropped as soon as it ends.

use crate::controller::{SessionController, SessionSnapshot, TickOutcome};
use crate::domain::error::{PersistenceError, SessionError};
use crate::domain::models::{
    AppEvent, ConnectionState, DeviceId, HeartRateSample, MessageSeverity, StatusMessage,
    TransportEvent,
};
use crate::domain::settings::SessionSettings;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::transport::HeartRateTransport;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub enum SessionCommand {
    SelectDevice(DeviceId, Reply<()>),
    Connect(DeviceId, Reply<()>),
    Disconnect(Reply<DeviceId>),
    AutoConnect(Reply<()>),
    ToggleBroadcast(Reply<bool>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    NearestTo(DateTime<Utc>, oneshot::Sender<Option<HeartRateSample>>),
    Shutdown,
}

/// Cloneable front door to a running session service.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub async fn select_device(&self, device_id: impl Into<DeviceId>) -> Result<(), SessionError> {
        let device_id = device_id.into();
        self.request(|reply| SessionCommand::SelectDevice(device_id, reply))
            .await
    }

    pub async fn connect(&self, device_id: impl Into<DeviceId>) -> Result<(), SessionError> {
        let device_id = device_id.into();
        self.request(|reply| SessionCommand::Connect(device_id, reply))
            .await
    }

    pub async fn disconnect(&self) -> Result<DeviceId, SessionError> {
        self.request(SessionCommand::Disconnect).await
    }

    pub async fn auto_connect(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::AutoConnect).await
    }

    /// Returns whether a broadcast session is active afterwards.
    pub async fn toggle_broadcast(&self) -> Result<bool, SessionError> {
        self.request(SessionCommand::ToggleBroadcast).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await.map_err(|_| SessionError::ServiceStopped)
    }

    pub async fn nearest_to(
        &self,
        time: DateTime<Utc>,
    ) -> Result<Option<HeartRateSample>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::NearestTo(time, tx))?;
        rx.await.map_err(|_| SessionError::ServiceStopped)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| SessionError::ServiceStopped)?
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::ServiceStopped)
    }
}

pub struct SessionService<T: HeartRateTransport> {
    controller: SessionController,
    transport: T,
    clock: Box<dyn Clock>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    tick_period: Duration,
    ticker: Option<Interval>,
}

impl<T: HeartRateTransport> SessionService<T> {
    pub fn new(
        controller: SessionController,
        transport: T,
        clock: Box<dyn Clock>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            controller,
            transport,
            clock,
            event_sender,
            tick_period: Duration::from_millis(settings.tick_interval_ms.max(1)),
            ticker: None,
        }
    }

    /// Start the actor on the current runtime.
    pub fn spawn(
        self,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(self.run(rx, transport_events));
        (SessionHandle { commands: tx }, worker)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!("Session service started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                _ = next_tick(&mut self.ticker) => self.on_tick().await,
            }
        }
        if self.controller.is_broadcasting() {
            if let Err(e) = self.controller.toggle_broadcast() {
                debug!("{}", e);
            }
        }
        info!("Session service stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let before = self.observe();
        match command {
            SessionCommand::SelectDevice(device_id, reply) => {
                let result = self.controller.select_device(device_id);
                self.respond(reply, result);
            }
            SessionCommand::Connect(device_id, reply) => {
                let result = self.connect(device_id);
                self.respond(reply, result);
            }
            SessionCommand::Disconnect(reply) => {
                let result = self.disconnect();
                self.respond(reply, result);
            }
            SessionCommand::AutoConnect(reply) => {
                let result = self.auto_connect();
                self.respond(reply, result);
            }
            SessionCommand::ToggleBroadcast(reply) => {
                let result = self.controller.toggle_broadcast().map(|toggle| {
                    if let Some(err) = &toggle.log_error {
                        self.report_persistence(err);
                    }
                    toggle.active
                });
                self.respond(reply, result);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.controller.snapshot());
            }
            SessionCommand::NearestTo(time, reply) => {
                let _ = reply.send(self.controller.nearest_to(time).copied());
            }
            SessionCommand::Shutdown => {}
        }
        self.publish_changes(before);
    }

    fn connect(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        self.controller.connect(device_id.clone())?;
        if let Err(e) = self.transport.connect(&device_id) {
            error!("Connection request failed: {}", e);
            return Err(self.controller.connect_failed(e.to_string()));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<DeviceId, SessionError> {
        let device_id = self.controller.disconnect()?;
        if let Err(e) = self.transport.disconnect(&device_id) {
            warn!("Transport disconnect of {} failed: {}", device_id, e);
        }
        Ok(device_id)
    }

    fn auto_connect(&mut self) -> Result<(), SessionError> {
        self.controller.auto_connect()?;
        self.transport
            .auto_connect()
            .map_err(|e| SessionError::ConnectionFailed {
                device: DeviceId::unknown(),
                reason: e.to_string(),
            })
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        debug!("Transport event: {:?}", event);
        let before = self.observe();
        if let Err(err) = self.controller.handle_transport_event(event) {
            self.report(&err);
        }
        self.publish_changes(before);
    }

    async fn on_tick(&mut self) {
        let reading = self.transport.current_heart_rate().await;
        let now = self.clock.now();
        match self.controller.tick(reading, now) {
            Ok(TickOutcome::Recorded(recorded)) => {
                if let Some(err) = &recorded.log_error {
                    self.report_persistence(err);
                }
                self.send(AppEvent::HeartRate(recorded.sample));
            }
            Ok(TickOutcome::NoReading) => {}
            Ok(TickOutcome::Idle) => {
                debug!("Tick after broadcast stopped");
                self.ticker = None;
            }
            Err(err) => self.report(&err),
        }
    }

    fn observe(&self) -> (ConnectionState, bool) {
        (
            self.controller.connection_state().clone(),
            self.controller.is_broadcasting(),
        )
    }

    /// Emit state changes and keep the ticker in step with the broadcast flag.
    fn publish_changes(&mut self, (connection, broadcasting): (ConnectionState, bool)) {
        let state = self.controller.connection_state().clone();
        if state != connection {
            if let ConnectionState::Connected { device_id } = &state {
                info!("Connected to {}", device_id);
                self.send(AppEvent::LogMessage(StatusMessage {
                    message: format!("Connection established with {}", device_id),
                    severity: MessageSeverity::Success,
                }));
            }
            self.send(AppEvent::ConnectionState(state));
        }
        let now_broadcasting = self.controller.is_broadcasting();
        if now_broadcasting != broadcasting {
            self.ticker = now_broadcasting.then(|| self.arm_ticker());
            self.send(AppEvent::BroadcastActive(now_broadcasting));
        }
    }

    fn arm_ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    fn respond<R>(&self, reply: Reply<R>, result: Result<R, SessionError>) {
        if let Err(err) = &result {
            self.report(err);
        }
        let _ = reply.send(result);
    }

    fn report(&self, err: &SessionError) {
        let severity = err.severity();
        match severity {
            MessageSeverity::Error => error!("{}", err),
            MessageSeverity::Warning => warn!("{}", err),
            _ => info!("{}", err),
        }
        self.send(AppEvent::LogMessage(StatusMessage {
            message: err.to_string(),
            severity,
        }));
        if err.is_user_visible() {
            self.send(AppEvent::GeneralMessage(err.to_string()));
        }
    }

    fn report_persistence(&self, err: &PersistenceError) {
        self.send(AppEvent::LogMessage(StatusMessage {
            message: err.to_string(),
            severity: MessageSeverity::Warning,
        }));
    }

    fn send(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}
