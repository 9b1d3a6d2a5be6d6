//! Command parsing and dispatch
//!
//! One JSON object per line, discriminated by the top-level `type` field.
//! Every line produces exactly one reply line, in arrival order. Threshold
//! values are centi-scaled and truncated to the device's 16-bit registers;
//! values above 655.35 wrap, matching the register width.

use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use serde::Deserialize;

use crate::gateway::DeviceGateway;
use crate::health::HealthRegistry;
use crate::supervisor::ReloadSignal;

const COMPONENT: &str = "command_router";

const REPLY_THRESHOLD: &str = r#"{"status":"ok","message":"threshold updated"}"#;
const REPLY_LIGHT_CONTROL: &str = r#"{"status":"ok","message":"light control updated"}"#;
const REPLY_MODE: &str = r#"{"status":"ok","message":"mode updated"}"#;
const REPLY_WRITE: &str = r#"{"status":"ok","message":"register write queued"}"#;
const REPLY_RELOAD: &str = r#"{"status":"ok","message":"configuration reload requested"}"#;
const REPLY_UNKNOWN: &str = r#"{"status":"error","message":"unknown command"}"#;
const REPLY_INVALID: &str = r#"{"status":"error","message":"invalid payload"}"#;

/// Callback producing the diagnostics JSON returned verbatim to the client
pub type DiagnosticsProvider = Box<dyn Fn() -> serde_json::Value + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Command {
    #[serde(rename = "threshold")]
    Threshold {
        #[serde(default)]
        soil: f64,
        #[serde(default)]
        rain: f64,
        #[serde(default)]
        temp: f64,
        #[serde(default)]
        light: f64,
    },
    #[serde(rename = "light_control")]
    LightControl {
        #[serde(default)]
        light: f64,
    },
    #[serde(rename = "mode_select")]
    ModeSelect {
        #[serde(default)]
        mode: i64,
    },
    #[serde(rename = "write_register")]
    WriteRegister {
        #[serde(default = "default_register_address")]
        address: i64,
        #[serde(default)]
        value: i64,
    },
    #[serde(rename = "diagnostics")]
    Diagnostics,
    #[serde(rename = "config_reload")]
    ConfigReload,
}

fn default_register_address() -> i64 {
    -1
}

/// Parses command lines and dispatches them to the device gateway, the
/// diagnostics provider, or the reload signal
pub struct CommandRouter {
    gateway: Arc<DeviceGateway>,
    health: Arc<HealthRegistry>,
    reload: ReloadSignal,
    diagnostics: OnceLock<DiagnosticsProvider>,
}

impl CommandRouter {
    pub fn new(
        gateway: Arc<DeviceGateway>,
        health: Arc<HealthRegistry>,
        reload: ReloadSignal,
    ) -> Self {
        Self {
            gateway,
            health,
            reload,
            diagnostics: OnceLock::new(),
        }
    }

    /// Register the diagnostics callback; effective once
    pub fn set_diagnostics_provider(&self, provider: DiagnosticsProvider) {
        let _ = self.diagnostics.set(provider);
    }

    /// Handle one complete command line and produce its reply
    pub async fn handle_line(&self, line: &str) -> String {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                self.health.update(COMPONENT, false, e.to_string());
                return REPLY_INVALID.to_string();
            }
        };

        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return REPLY_UNKNOWN.to_string();
        };
        let known = matches!(
            kind,
            "threshold"
                | "light_control"
                | "mode_select"
                | "write_register"
                | "diagnostics"
                | "config_reload"
        );
        if !known {
            return REPLY_UNKNOWN.to_string();
        }

        match serde_json::from_value::<Command>(value) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                self.health.update(COMPONENT, false, e.to_string());
                REPLY_INVALID.to_string()
            }
        }
    }

    async fn dispatch(&self, command: Command) -> String {
        match command {
            Command::Threshold {
                soil,
                rain,
                temp,
                light,
            } => {
                self.gateway.write_register(10, centi(soil)).await;
                self.gateway.write_register(11, centi(rain)).await;
                self.gateway.write_register(12, centi(temp)).await;
                self.gateway.write_register(13, centi(light)).await;
                self.health.update(COMPONENT, true, "threshold updated");
                REPLY_THRESHOLD.to_string()
            }
            Command::LightControl { light } => {
                self.gateway.write_register(14, centi(light)).await;
                self.health.update(COMPONENT, true, "light control updated");
                REPLY_LIGHT_CONTROL.to_string()
            }
            Command::ModeSelect { mode } => {
                self.gateway.write_register(15, mode as u16).await;
                self.health.update(COMPONENT, true, "mode updated");
                REPLY_MODE.to_string()
            }
            Command::WriteRegister { address, value } => {
                if address >= 0 {
                    self.gateway
                        .write_register(address as u16, value as u16)
                        .await;
                }
                REPLY_WRITE.to_string()
            }
            Command::Diagnostics => match self.diagnostics.get() {
                Some(provider) => provider().to_string(),
                None => serde_json::json!({}).to_string(),
            },
            Command::ConfigReload => {
                self.reload.request();
                REPLY_RELOAD.to_string()
            }
        }
    }
}

/// Centi-scale a value into a 16-bit register, truncating toward zero
fn centi(value: f64) -> u16 {
    (value * 100.0) as i64 as u16
}

/// Pop the next complete `\n`-terminated line off a per-connection buffer
///
/// Returns `None` until a full line is available; the newline (and an
/// optional preceding `\r`) is stripped.
pub fn drain_line(buffer: &mut BytesMut) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let mut line = buffer.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        let end = line.len() - 1;
        line.truncate(end);
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}
