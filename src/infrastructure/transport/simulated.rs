//! Stand-in for the vendor SDK, producing plausible readings around a base
//! rate once "connected".

use crate::domain::models::{DeviceId, TransportEvent};
use crate::domain::settings::SimulationSettings;
use crate::infrastructure::transport::HeartRateTransport;
use anyhow::{anyhow, bail, Result};
use rand::Rng;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug)]
struct DeviceState {
    bluetooth_enabled: bool,
    pending: Option<DeviceId>,
    connected: Option<DeviceId>,
    base_rate: u16,
    variability: u16,
}

/// Control surface of the simulated radio, for tests and the runner.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SimulatedDevice {
    /// Turning the radio off also drops any connection.
    pub fn set_bluetooth(&self, enabled: bool) -> Result<()> {
        let dropped = {
            let mut state = self.lock()?;
            state.bluetooth_enabled = enabled;
            if enabled {
                None
            } else {
                state.pending = None;
                state.connected.take()
            }
        };
        let _ = self.events.send(TransportEvent::BluetoothPowered(enabled));
        if let Some(device_id) = dropped {
            let _ = self.events.send(TransportEvent::Disconnected(device_id));
        }
        Ok(())
    }

    /// Simulates the sensor going out of range.
    pub fn drop_connection(&self) -> Result<()> {
        let dropped = self.lock()?.connected.take();
        if let Some(device_id) = dropped {
            info!("Simulated device {} went out of range", device_id);
            let _ = self.events.send(TransportEvent::Disconnected(device_id));
        }
        Ok(())
    }

    pub fn set_rate(&self, base_rate: u16, variability: u16) -> Result<()> {
        let mut state = self.lock()?;
        state.base_rate = base_rate;
        state.variability = variability;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DeviceState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Simulated device lock poisoned"))
    }
}

pub struct SimulatedTransport {
    device: SimulatedDevice,
    default_device: DeviceId,
    connect_delay: Duration,
}

impl SimulatedTransport {
    pub fn new(
        settings: &SimulationSettings,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let state = DeviceState {
            bluetooth_enabled: true,
            pending: None,
            connected: None,
            base_rate: settings.base_rate,
            variability: settings.variability,
        };
        Self {
            device: SimulatedDevice {
                state: Arc::new(Mutex::new(state)),
                events,
            },
            default_device: DeviceId::new(settings.device_id.clone()),
            connect_delay: Duration::from_millis(settings.connect_delay_ms),
        }
    }

    pub fn device(&self) -> SimulatedDevice {
        self.device.clone()
    }

    fn begin_connect(&mut self, device_id: DeviceId) -> Result<()> {
        {
            let mut state = self.device.lock()?;
            if !state.bluetooth_enabled {
                bail!("bluetooth is off");
            }
            if let Some(connected) = &state.connected {
                bail!("already connected to {}", connected);
            }
            state.pending = Some(device_id.clone());
        }
        let _ = self
            .device
            .events
            .send(TransportEvent::Connecting(device_id.clone()));

        let device = self.device.clone();
        let delay = self.connect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let established = match device.state.lock() {
                Ok(mut state) if state.pending.as_ref() == Some(&device_id) => {
                    state.pending = None;
                    state.connected = Some(device_id.clone());
                    true
                }
                _ => false,
            };
            if established {
                debug!("Simulated device {} connected", device_id);
                let _ = device.events.send(TransportEvent::Connected(device_id));
            }
        });
        Ok(())
    }

    fn sample(&self) -> Option<u16> {
        let state = self.device.state.lock().ok()?;
        state.connected.as_ref()?;
        let spread = i32::from(state.variability);
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(-spread..=spread)
        };
        let rate = (i32::from(state.base_rate) + jitter).clamp(0, i32::from(u16::MAX));
        u16::try_from(rate).ok()
    }
}

impl HeartRateTransport for SimulatedTransport {
    fn bluetooth_enabled(&self) -> bool {
        self.device
            .state
            .lock()
            .map(|state| state.bluetooth_enabled)
            .unwrap_or(false)
    }

    fn connect(&mut self, device_id: &DeviceId) -> Result<()> {
        self.begin_connect(device_id.clone())
    }

    fn auto_connect(&mut self) -> Result<()> {
        let device_id = self.default_device.clone();
        info!("Auto-connecting to nearest device {}", device_id);
        self.begin_connect(device_id)
    }

    fn disconnect(&mut self, device_id: &DeviceId) -> Result<()> {
        let dropped = {
            let mut state = self.device.lock()?;
            state.pending = None;
            if state.connected.as_ref() == Some(device_id) {
                state.connected.take()
            } else {
                None
            }
        };
        if let Some(device_id) = dropped {
            let _ = self
                .device
                .events
                .send(TransportEvent::Disconnected(device_id));
        }
        Ok(())
    }

    fn current_heart_rate(&self) -> impl Future<Output = Option<u16>> + Send {
        let reading = self.sample();
        async move { reading }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (SimulatedTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = SimulationSettings {
            variability: 0,
            connect_delay_ms: 200,
            ..SimulationSettings::default()
        };
        (SimulatedTransport::new(&settings, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reports_progress() {
        let (mut transport, mut events) = transport();
        assert_eq!(transport.current_heart_rate().await, None);

        transport.connect(&"X".into()).unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Connecting("X".into()))
        );
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Connected("X".into()))
        );
        assert_eq!(transport.current_heart_rate().await, Some(72));

        assert!(transport.connect(&"Y".into()).is_err());

        transport.disconnect(&"X".into()).unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Disconnected("X".into()))
        );
        assert_eq!(transport.current_heart_rate().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rates_stay_within_variability() {
        let (mut transport, mut events) = transport();
        transport.device().set_rate(80, 4).unwrap();
        transport.auto_connect().unwrap();
        events.recv().await;
        events.recv().await;
        for _ in 0..50 {
            let rate = transport.current_heart_rate().await.unwrap();
            assert!((76..=84).contains(&rate));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bluetooth_off_drops_connection() {
        let (mut transport, mut events) = transport();
        transport.connect(&"X".into()).unwrap();
        events.recv().await;
        events.recv().await;

        transport.device().set_bluetooth(false).unwrap();
        assert!(!transport.bluetooth_enabled());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::BluetoothPowered(false))
        );
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Disconnected("X".into()))
        );
        assert!(transport.connect(&"X".into()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attempt_never_connects() {
        let (mut transport, mut events) = transport();
        transport.connect(&"X".into()).unwrap();
        events.recv().await;
        transport.disconnect(&"X".into()).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(transport.current_heart_rate().await, None);
    }
}
