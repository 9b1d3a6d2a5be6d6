//! Service configuration
//!
//! A single JSON document configures every subsystem. Missing keys fall back
//! to defaults, unknown keys are ignored, and a missing file is replaced
//! with a default template so an operator always has something to edit.

pub mod manager;
pub mod settings;

pub use manager::ConfigManager;
pub use settings::{
    AppConfig, DatabaseConfig, HealthConfig, PipelineConfig, PublisherConfig, SensorConfig,
    VideoConfig,
};
