//! fieldlink: sensor telemetry edge service
//!
//! Samples a field device over Modbus/TCP, reconciles those readings with
//! historical rows from a relational store, keeps a bounded in-memory
//! history per channel, and fans the resulting frames out to long-lived TCP
//! subscribers. An independent listener relays opaque video frames from one
//! publisher client to many subscribers.
//!
//! # Architecture
//!
//! ```text
//!   field device ⇄ [gateway]          [repository] ← relational store
//!                      │                   │
//!                      └──► [pipeline] ◄───┘
//!                              │  store
//!                              ▼
//!                          [cache]──snapshot──┐
//!                              │ frames       ▼
//!                              └─────► [server] ⇄ subscribers
//!                                         │ commands
//!                                         ▼
//!                                     [command] ──► gateway writes,
//!                                                   diagnostics, reload
//!
//!   video publisher ──► [video relay] ──► video subscribers
//! ```
//!
//! The supervisor owns every component for the process lifetime and wires
//! the cross-component callbacks (snapshot provider, diagnostics provider,
//! reload signal) at startup.

pub mod cache;
pub mod command;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod health;
pub mod pipeline;
pub mod repository;
pub mod server;
pub mod supervisor;
pub mod video;

pub use cache::ChannelCache;
pub use config::{AppConfig, ConfigManager};
pub use domain::{Channel, Reading, TelemetryFrame};
pub use error::{Error, Result};
pub use server::TelemetryServer;
