//! Bounded per-channel reading history
//!
//! The cache is shared between the pipeline (writer) and the subscriber
//! server's snapshot path (reader) under a single mutex. Each channel holds
//! at most `capacity` readings; the oldest is evicted on overflow.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::domain::{Channel, Reading};

/// Thread-safe bounded FIFO of readings per channel
#[derive(Debug)]
pub struct ChannelCache {
    capacity: usize,
    buffers: Mutex<HashMap<Channel, VecDeque<Reading>>>,
}

impl ChannelCache {
    /// Create a cache holding up to `capacity` readings per channel
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Append a reading; evicts the oldest entry when the channel is full
    pub fn store(&self, channel: Channel, reading: Reading) {
        let mut buffers = self.buffers.lock().expect("cache mutex poisoned");
        let buffer = buffers.entry(channel).or_default();
        buffer.push_back(reading);
        if buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    /// Copy of a channel's readings in insertion order
    pub fn snapshot(&self, channel: Channel) -> Vec<Reading> {
        let buffers = self.buffers.lock().expect("cache mutex poisoned");
        buffers
            .get(&channel)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Copy of all readings; order within a channel is preserved, order
    /// across channels is unspecified
    pub fn snapshot_all(&self) -> Vec<Reading> {
        let buffers = self.buffers.lock().expect("cache mutex poisoned");
        buffers
            .values()
            .flat_map(|buffer| buffer.iter().cloned())
            .collect()
    }

    /// Configured per-channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(tag: &str) -> Reading {
        Reading {
            label: tag.to_string(),
            ..Reading::default()
        }
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let cache = ChannelCache::new(8);
        cache.store(Channel::Realtime, reading("r1"));
        cache.store(Channel::Realtime, reading("r2"));
        cache.store(Channel::Realtime, reading("r3"));

        let snap = cache.snapshot(Channel::Realtime);
        let labels: Vec<&str> = snap.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["r1", "r2", "r3"]);
    }

    #[test]
    fn test_overflow_evicts_exactly_the_oldest() {
        let cache = ChannelCache::new(3);
        for tag in ["r1", "r2", "r3", "r4"] {
            cache.store(Channel::Realtime, reading(tag));
        }

        let snap = cache.snapshot(Channel::Realtime);
        let labels: Vec<&str> = snap.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["r2", "r3", "r4"]);
    }

    #[test]
    fn test_capacity_bound_is_strict() {
        let cache = ChannelCache::new(5);
        for i in 0..100 {
            cache.store(Channel::HistoricalSoil, reading(&format!("r{i}")));
        }
        assert_eq!(cache.snapshot(Channel::HistoricalSoil).len(), 5);
    }

    #[test]
    fn test_channels_are_independent() {
        let cache = ChannelCache::new(2);
        cache.store(Channel::Realtime, reading("rt"));
        cache.store(Channel::HistoricalEnvironment, reading("env"));

        assert_eq!(cache.snapshot(Channel::Realtime).len(), 1);
        assert_eq!(cache.snapshot(Channel::HistoricalEnvironment).len(), 1);
        assert!(cache.snapshot(Channel::HistoricalSoil).is_empty());
    }

    #[test]
    fn test_snapshot_all_collects_every_channel() {
        let cache = ChannelCache::new(4);
        cache.store(Channel::Realtime, reading("rt"));
        cache.store(Channel::HistoricalEnvironment, reading("env"));
        cache.store(Channel::HistoricalSoil, reading("soil"));

        assert_eq!(cache.snapshot_all().len(), 3);
    }

    #[test]
    fn test_snapshot_returns_a_copy() {
        let cache = ChannelCache::new(4);
        cache.store(Channel::Realtime, reading("r1"));

        let mut snap = cache.snapshot(Channel::Realtime);
        snap.clear();

        assert_eq!(cache.snapshot(Channel::Realtime).len(), 1);
    }
}
