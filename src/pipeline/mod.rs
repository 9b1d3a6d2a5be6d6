//! Telemetry acquisition pipeline
//!
//! Multiplexes the fast real-time cadence with the slower historical cadence
//! against the shared channel cache, and feeds the subscriber server.

pub mod service;

pub use service::TelemetryPipeline;
