//! Process health reporting
//!
//! Components report their status into a shared registry; a background
//! worker periodically persists a JSON snapshot for external monitoring.

pub mod registry;

pub use registry::{HealthRegistry, HealthState};
