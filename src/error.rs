//! Crate-wide error types
//!
//! Recoverable failures (device I/O, database I/O, a single subscriber's
//! send) are absorbed at the component that observed them: logged, reflected
//! in the health registry, and turned into `None` or an empty result. Only
//! startup-time failures propagate out of the supervisor.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all fieldlink operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration content
    #[error("configuration error: {0}")]
    Config(String),

    /// Field-device I/O failure (trips the gateway reconnect)
    #[error("device error: {0}")]
    Device(String),

    /// Relational store failure (trips the repository reconnect)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed wire payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unrecoverable startup failure (process exits non-zero)
    #[error("startup failure: {0}")]
    Startup(String),
}
