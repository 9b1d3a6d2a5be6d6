//! Readings and channels
//!
//! A `Reading` is one sampled data point; a `Channel` is the logical stream
//! it belongs to. Channel wire tokens are stable and consumed by external
//! subscribers, so they are fixed here rather than derived from the variant
//! names.

use serde::{Deserialize, Serialize};

/// Origin tag for real-time samples
pub const LABEL_REALTIME: &str = "Realtime";
/// Origin tag for historical environmental rows
pub const LABEL_HISTORICAL_ENV: &str = "Historical_ENV";
/// Origin tag for historical soil/air rows
pub const LABEL_HISTORICAL_SOIL: &str = "Historical_Soil";

/// Timestamp layout used on the wire and in the database ("2024-01-14 10:30:45")
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A logical stream of readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Live samples from the field device
    #[serde(rename = "realtime")]
    Realtime,
    /// Historical environmental rows (temperature, humidity, light)
    #[serde(rename = "historical_env")]
    HistoricalEnvironment,
    /// Historical soil and air quality rows (soil, gas, raindrop)
    #[serde(rename = "historical_soil")]
    HistoricalSoil,
}

impl Channel {
    /// All channels, in cache-snapshot order
    pub const ALL: [Channel; 3] = [
        Channel::Realtime,
        Channel::HistoricalEnvironment,
        Channel::HistoricalSoil,
    ];

    /// Stable wire token for this channel
    pub fn wire_name(&self) -> &'static str {
        match self {
            Channel::Realtime => "realtime",
            Channel::HistoricalEnvironment => "historical_env",
            Channel::HistoricalSoil => "historical_soil",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One sampled data point
///
/// Immutable once constructed. Missing numeric fields decode as 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub label: String,
    pub timestamp: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub humidity: f64,
    #[serde(default)]
    pub light: f64,
    #[serde(default)]
    pub soil: f64,
    #[serde(default)]
    pub gas: f64,
    #[serde(default)]
    pub raindrop: f64,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            label: LABEL_REALTIME.to_string(),
            timestamp: String::new(),
            temperature: 0.0,
            humidity: 0.0,
            light: 0.0,
            soil: 0.0,
            gas: 0.0,
            raindrop: 0.0,
        }
    }
}

/// Current wall-clock time rendered in the wire timestamp layout
pub fn local_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
