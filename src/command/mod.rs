//! Subscriber command plane
//!
//! Commands arrive as newline-terminated JSON lines on the telemetry
//! listener and translate into register writes, diagnostics snapshots, or a
//! configuration reload request.

pub mod router;

pub use router::{drain_line, CommandRouter, DiagnosticsProvider};
