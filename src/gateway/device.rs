//! Device gateway
//!
//! Serializes all field-device I/O behind one mutex. Connection state is
//! Disconnected/Connected with a rate limit on reconnect attempts: after a
//! failed attempt, further attempts are suppressed until `retrySeconds` has
//! elapsed. Any operation failure tears the connection down; no device error
//! escapes this module.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SensorConfig;
use crate::domain::reading::{local_timestamp, Reading, LABEL_REALTIME};
use crate::gateway::transport::{RegisterLink, RegisterTransport};
use crate::health::HealthRegistry;

const COMPONENT: &str = "sensor_gateway";

struct LinkState {
    link: Option<Box<dyn RegisterLink>>,
    last_attempt: Option<Instant>,
}

/// Single serialized access point to the field device
pub struct DeviceGateway {
    config: SensorConfig,
    transport: Box<dyn RegisterTransport>,
    health: Arc<HealthRegistry>,
    state: Mutex<LinkState>,
}

impl DeviceGateway {
    pub fn new(
        config: SensorConfig,
        transport: Box<dyn RegisterTransport>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            config,
            transport,
            health,
            state: Mutex::new(LinkState {
                link: None,
                last_attempt: None,
            }),
        }
    }

    /// Sample the device once
    ///
    /// Registers 0..5 carry centi-units of soil, gas, raindrop, temperature,
    /// humidity and light; each divides by 100 on the way out. Returns `None`
    /// when disconnected and the reconnect is still rate-limited, or when the
    /// read fails.
    pub async fn read_realtime(&self) -> Option<Reading> {
        let mut state = self.state.lock().await;
        if !self.ensure_connected(&mut state).await {
            return None;
        }

        let count = self.config.registers;
        let link = state.link.as_mut()?;
        let registers = match link.read_registers(0, count).await {
            Ok(registers) => registers,
            Err(e) => {
                self.drop_link(&mut state, format!("register read failed: {e}"));
                return None;
            }
        };

        let mut reading = Reading {
            label: LABEL_REALTIME.to_string(),
            timestamp: local_timestamp(),
            ..Reading::default()
        };
        if registers.len() >= 6 {
            reading.soil = f64::from(registers[0]) / 100.0;
            reading.gas = f64::from(registers[1]) / 100.0;
            reading.raindrop = f64::from(registers[2]) / 100.0;
            reading.temperature = f64::from(registers[3]) / 100.0;
            reading.humidity = f64::from(registers[4]) / 100.0;
            reading.light = f64::from(registers[5]) / 100.0;
        }

        self.health.update(COMPONENT, true, "realtime sample collected");
        Some(reading)
    }

    /// Write one 16-bit register; failures are absorbed here
    pub async fn write_register(&self, address: u16, value: u16) {
        let mut state = self.state.lock().await;
        if !self.ensure_connected(&mut state).await {
            return;
        }

        let Some(link) = state.link.as_mut() else {
            return;
        };
        match link.write_register(address, value).await {
            Ok(()) => {
                self.health.update(COMPONENT, true, "register write successful");
            }
            Err(e) => {
                self.drop_link(&mut state, format!("register write failed: {e}"));
            }
        }
    }

    /// Discard the connection on clean shutdown
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.link = None;
    }

    async fn ensure_connected(&self, state: &mut LinkState) -> bool {
        if state.link.is_some() {
            return true;
        }

        let retry_interval = Duration::from_secs(self.config.retry_seconds);
        if let Some(last_attempt) = state.last_attempt {
            if last_attempt.elapsed() < retry_interval {
                return false;
            }
        }
        state.last_attempt = Some(Instant::now());

        match self.transport.connect().await {
            Ok(link) => {
                state.link = Some(link);
                tracing::info!(
                    endpoint = %self.config.endpoint,
                    port = self.config.port,
                    "Connected to field device"
                );
                self.health.update(COMPONENT, true, "device connected");
                true
            }
            Err(e) => {
                self.drop_link(state, format!("connection error: {e}"));
                false
            }
        }
    }

    fn drop_link(&self, state: &mut LinkState, reason: String) {
        state.link = None;
        tracing::warn!(reason = %reason, "Field device failure");
        self.health.update(COMPONENT, false, reason);
    }
}
