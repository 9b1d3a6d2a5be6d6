//! Configuration sections and their defaults

use serde::{Deserialize, Serialize};

/// Relational store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Database (schema) name
    pub schema: String,
    pub port: u16,
    /// Row cap for the "most recent N" history queries
    pub recent_limit: u16,
    pub retry_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            user: "root".to_string(),
            password: "password".to_string(),
            schema: "testdb".to_string(),
            port: 3306,
            recent_limit: 50,
            retry_seconds: 5,
        }
    }
}

/// Field-device (Modbus/TCP) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorConfig {
    pub endpoint: String,
    pub port: u16,
    /// Minimum delay between reconnect attempts
    pub retry_seconds: u64,
    /// Number of holding registers read per realtime sample
    pub registers: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1".to_string(),
            port: 502,
            retry_seconds: 5,
            registers: 6,
        }
    }
}

/// Telemetry subscriber listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherConfig {
    pub bind_address: String,
    pub port: u16,
    pub worker_threads: u16,
    pub max_connections: u16,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5555,
            worker_threads: 4,
            max_connections: 200,
        }
    }
}

/// Video relay listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConfig {
    pub port: u16,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { port: 6000 }
    }
}

/// Health status persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub status_file: String,
    pub interval_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            status_file: "artifacts/health_status.json".to_string(),
            interval_seconds: 10,
        }
    }
}

/// Telemetry pipeline cadence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub realtime_seconds: u64,
    pub historical_seconds: u64,
    /// Per-channel cache capacity; also the history query limit
    pub cache_size: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            realtime_seconds: 5,
            historical_seconds: 60,
            cache_size: 120,
        }
    }
}

/// Aggregate service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sensor: SensorConfig,
    pub publisher: PublisherConfig,
    pub video: VideoConfig,
    pub health: HealthConfig,
    pub pipeline: PipelineConfig,
}
