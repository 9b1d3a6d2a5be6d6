//! Video relay
//!
//! An independent single-producer/many-consumer path: one publisher client
//! pushes opaque frames, every subscriber-role client receives them
//! verbatim. No framing is imposed on the stream.

pub mod relay;

pub use relay::{VideoPacket, VideoRelay, VideoRole};
