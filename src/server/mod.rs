//! Telemetry subscriber server
//!
//! The fan-out side of the service. Every accepted connection is a
//! subscriber: it first receives a snapshot of cached state, then every
//! frame published by the pipeline, while its inbound bytes feed the
//! command plane.
//!
//! ```text
//!                     Arc<TelemetryServer>
//!                ┌──────────────────────────┐
//!                │ frames: broadcast::Tx    │
//!                │ subscribers: AtomicUsize │
//!                │ snapshot_provider        │
//!                └────────────┬─────────────┘
//!                             │ publish() = encode once, send
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    [Subscriber]        [Subscriber]        [Subscriber]
//!    snapshot, then      frames.recv()       frames.recv()
//!    frames.recv()            │                   │
//!         └── commands in ────┴── replies out ────┘
//! ```

pub mod listener;

pub use listener::{SnapshotProvider, TelemetryServer};
