//! Core telemetry domain types
//!
//! Defines the reading/channel/frame vocabulary shared by the pipeline, the
//! cache, and the subscriber server, plus the length-prefixed wire encoding.

pub mod frame;
pub mod reading;

pub use frame::{FrameSequence, TelemetryFrame};
pub use reading::{Channel, Reading};
pub use reading::{LABEL_HISTORICAL_ENV, LABEL_HISTORICAL_SOIL, LABEL_REALTIME};
