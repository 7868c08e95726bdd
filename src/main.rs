use heart_rate_monitor::controller::SessionController;
use heart_rate_monitor::domain::models::{AppEvent, ConnectionState, MessageSeverity};
use heart_rate_monitor::domain::recording::LineFormat;
use heart_rate_monitor::domain::settings::SettingsService;
use heart_rate_monitor::infrastructure::clock::MonotonicClock;
use heart_rate_monitor::infrastructure::logging::init_logger;
use heart_rate_monitor::infrastructure::recording::FileSampleLog;
use heart_rate_monitor::infrastructure::session_service::SessionService;
use heart_rate_monitor::infrastructure::transport::{HeartRateTransport, SimulatedTransport};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;

    let _logging_guard = init_logger(&settings_service.get().logging)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting heart rate monitor");
    debug!("Settings loaded from {}", settings_service.path().display());

    let settings = settings_service.get().clone();
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let transport = SimulatedTransport::new(&settings.simulation, transport_tx);
    let record_path = settings.recording.file_path();
    let controller = SessionController::new(
        &settings.session,
        Box::new(FileSampleLog::new(&record_path)),
        LineFormat::from_settings(&settings.recording),
        transport.bluetooth_enabled(),
    );
    let service = SessionService::new(
        controller,
        transport,
        Box::new(MonotonicClock::new()),
        event_tx,
        &settings.session,
    );
    let (handle, worker) = service.spawn(transport_rx);

    let device_id = settings
        .last_connected_device_id
        .clone()
        .unwrap_or_else(|| settings.simulation.device_id.clone());
    handle.select_device(device_id.as_str()).await?;
    handle.connect(device_id.as_str()).await?;

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
        while let Some(event) = event_rx.recv().await {
            match event {
                AppEvent::ConnectionState(ConnectionState::Connected { device_id }) => {
                    return Ok(device_id);
                }
                AppEvent::GeneralMessage(message) => anyhow::bail!(message),
                other => log_event(&other),
            }
        }
        anyhow::bail!("session service stopped")
    })
    .await??;

    if let Err(e) = settings_service.remember_device(connected.as_str()) {
        warn!("Failed to save settings: {}", e);
    }

    handle.toggle_broadcast().await?;
    info!(
        "Recording for {}s to {}",
        settings.simulation.session_secs,
        record_path.display()
    );

    let deadline = tokio::time::sleep(Duration::from_secs(settings.simulation.session_secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = event_rx.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    let snapshot = handle.snapshot().await?;
    if snapshot.broadcast_active {
        handle.toggle_broadcast().await?;
    }
    info!(
        "Recorded {} samples, chart scale {}..{} bpm",
        snapshot.samples.len(),
        snapshot.scale.lower,
        snapshot.scale.upper
    );

    if snapshot.connection.is_connected() {
        handle.disconnect().await?;
    }
    handle.shutdown();
    worker.await?;
    Ok(())
}

fn log_event(event: &AppEvent) {
    match event {
        AppEvent::HeartRate(sample) => info!("Heart rate: {} bpm", sample.rate),
        AppEvent::ConnectionState(state) => info!("Connection: {}", state),
        AppEvent::BroadcastActive(active) => info!("Broadcast listening: {}", active),
        AppEvent::LogMessage(message) => match message.severity {
            MessageSeverity::Error => error!("{}", message.message),
            MessageSeverity::Warning => warn!("{}", message.message),
            MessageSeverity::Success => info!("{}", message.message),
            MessageSeverity::Info => debug!("{}", message.message),
        },
        AppEvent::GeneralMessage(message) => error!("{}", message),
    }
}
