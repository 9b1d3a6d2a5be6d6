//! Published telemetry frames and their wire encoding
//!
//! A frame is the unit handed to the subscriber server: a channel, an
//! ordered run of readings, a snapshot flag, and a process-monotonic
//! correlation id. On the wire it travels as one JSON object preceded by a
//! 4-byte big-endian length of the JSON bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::domain::reading::{Channel, Reading};
use crate::error::{Error, Result};

/// A published unit on the telemetry wire
///
/// A snapshot frame replays cached state (new subscriber catch-up or a
/// per-tick historical push); an incremental frame carries exactly the one
/// reading that was just sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub channel: Channel,
    pub snapshot: bool,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub readings: Vec<Reading>,
}

impl TelemetryFrame {
    /// Build an incremental frame carrying a single fresh reading
    pub fn incremental(channel: Channel, correlation_id: String, reading: Reading) -> Self {
        Self {
            channel,
            snapshot: false,
            correlation_id,
            readings: vec![reading],
        }
    }

    /// Build a snapshot frame replaying cached readings
    pub fn snapshot(channel: Channel, correlation_id: String, readings: Vec<Reading>) -> Self {
        Self {
            channel,
            snapshot: true,
            correlation_id,
            readings,
        }
    }

    /// Encode as length-prefixed JSON: 4-byte big-endian length, then the
    /// JSON object, no trailing padding
    pub fn encode(&self) -> Result<Bytes> {
        let payload = serde_json::to_vec(self).map_err(|e| Error::Protocol(e.to_string()))?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }
}

/// Process-wide monotonic correlation id source
///
/// Ids take the form `frame-<N>` with N starting at 1. Clients compare the
/// numeric suffix to detect gaps.
#[derive(Debug, Default)]
pub struct FrameSequence {
    counter: AtomicU64,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next correlation id
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("frame-{n}")
    }
}
