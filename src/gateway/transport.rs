//! Register transport seam
//!
//! The production transport wraps a Modbus/TCP client; tests substitute a
//! scripted implementation. One `connect` call produces one link; the
//! gateway decides when to retry.

use async_trait::async_trait;
use tokio_modbus::client::{tcp, Context, Reader, Writer};

use crate::error::{Error, Result};

/// An open register session with the field device
#[async_trait]
pub trait RegisterLink: Send {
    /// Read `count` holding registers starting at `address`
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Write one 16-bit holding register
    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Factory for register links; each call is one connect attempt
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RegisterLink>>;
}

/// Modbus/TCP transport backed by `tokio-modbus`
pub struct ModbusTransport {
    endpoint: String,
    port: u16,
}

impl ModbusTransport {
    pub fn new(endpoint: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: endpoint.into(),
            port,
        }
    }
}

#[async_trait]
impl RegisterTransport for ModbusTransport {
    async fn connect(&self) -> Result<Box<dyn RegisterLink>> {
        let target = format!("{}:{}", self.endpoint, self.port);
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| Error::Device(format!("resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| Error::Device(format!("no address for {target}")))?;

        let ctx = tcp::connect(addr)
            .await
            .map_err(|e| Error::Device(format!("connect {target}: {e}")))?;

        Ok(Box::new(ModbusLink { ctx }))
    }
}

struct ModbusLink {
    ctx: Context,
}

#[async_trait]
impl RegisterLink for ModbusLink {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.ctx
            .read_holding_registers(address, count)
            .await
            .map_err(|e| Error::Device(format!("read registers: {e}")))?
            .map_err(|code| Error::Device(format!("read registers: device exception {code:?}")))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.ctx
            .write_single_register(address, value)
            .await
            .map_err(|e| Error::Device(format!("write register: {e}")))?
            .map_err(|code| Error::Device(format!("write register: device exception {code:?}")))
    }
}
