//! Historical telemetry storage
//!
//! Read-only access to the relational store: two fixed "most recent N rows"
//! queries with connection-refresh semantics. The `HistorySource` trait is
//! the pipeline-facing seam.

pub mod history;

pub use history::{HistoryRepository, HistorySource};
