//! Field-device access
//!
//! The gateway is the single in-process arbiter of device I/O: one
//! connection, one mutex, rate-limited reconnects. The register transport is
//! a trait seam so the device can be scripted in tests.

pub mod device;
#[cfg(test)]
pub(crate) mod mock;
pub mod transport;

pub use device::DeviceGateway;
pub use transport::{ModbusTransport, RegisterLink, RegisterTransport};
