//! Dual-cadence sampling loop
//!
//! Every tick samples the device; when the historical interval has elapsed
//! the tick additionally pulls the two history tables. Real-time publishes
//! before historical on a shared tick. The loop never multiplies missed
//! ticks: if processing overruns the real-time interval it simply starts the
//! next tick immediately.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::ChannelCache;
use crate::config::PipelineConfig;
use crate::domain::{Channel, FrameSequence, TelemetryFrame};
use crate::gateway::DeviceGateway;
use crate::health::HealthRegistry;
use crate::repository::HistorySource;
use crate::server::TelemetryServer;

const COMPONENT: &str = "telemetry_pipeline";

/// Worker that reconciles device samples and historical rows into frames
pub struct TelemetryPipeline {
    config: PipelineConfig,
    repository: Arc<dyn HistorySource>,
    gateway: Arc<DeviceGateway>,
    server: Arc<TelemetryServer>,
    cache: Arc<ChannelCache>,
    health: Arc<HealthRegistry>,
    sequence: Arc<FrameSequence>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryPipeline {
    pub fn new(
        config: PipelineConfig,
        repository: Arc<dyn HistorySource>,
        gateway: Arc<DeviceGateway>,
        server: Arc<TelemetryServer>,
        cache: Arc<ChannelCache>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            repository,
            gateway,
            server,
            cache,
            health,
            sequence: Arc::new(FrameSequence::new()),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Register the snapshot source on the server: one snapshot frame per
    /// non-empty channel, drawn from the cache at accept time
    pub fn install_snapshot_provider(&self) {
        let cache = Arc::clone(&self.cache);
        let sequence = Arc::clone(&self.sequence);
        self.server
            .set_snapshot_provider(Box::new(move || snapshot_frames(&cache, &sequence)));
    }

    /// Spawn the worker loop
    pub fn start(self: &Arc<Self>) {
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.run_loop().await });
        *self.worker.lock().expect("pipeline mutex poisoned") = Some(handle);
    }

    /// Cooperative stop; joins the worker
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().expect("pipeline mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run_loop(&self) {
        let realtime_interval = Duration::from_secs(self.config.realtime_seconds);
        let historical_interval = Duration::from_secs(self.config.historical_seconds);
        let mut shutdown = self.shutdown.subscribe();
        // None forces the historical branch on the very first tick.
        let mut last_historical: Option<Instant> = None;

        while !*shutdown.borrow() {
            let tick_start = Instant::now();

            self.process_realtime().await;

            let due = last_historical.map_or(true, |at| at.elapsed() >= historical_interval);
            if due {
                self.process_historical().await;
                last_historical = Some(Instant::now());
            }

            let elapsed = tick_start.elapsed();
            if elapsed < realtime_interval {
                tokio::select! {
                    _ = tokio::time::sleep(realtime_interval - elapsed) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    async fn process_realtime(&self) {
        let Some(reading) = self.gateway.read_realtime().await else {
            self.health.update(COMPONENT, false, "realtime read failed");
            return;
        };

        self.cache.store(Channel::Realtime, reading.clone());

        if self.server.has_subscribers() {
            let frame =
                TelemetryFrame::incremental(Channel::Realtime, self.sequence.next_id(), reading);
            self.server.publish(&frame);
        }

        self.health
            .update(COMPONENT, true, "realtime frame published");
    }

    async fn process_historical(&self) {
        let limit = usize::from(self.config.cache_size);
        let env = self.repository.load_environmental(limit).await;
        let soil = self.repository.load_soil_and_air(limit).await;

        for reading in &env {
            self.cache
                .store(Channel::HistoricalEnvironment, reading.clone());
        }
        for reading in &soil {
            self.cache.store(Channel::HistoricalSoil, reading.clone());
        }

        if self.server.has_subscribers() {
            if !env.is_empty() {
                let frame = TelemetryFrame::snapshot(
                    Channel::HistoricalEnvironment,
                    self.sequence.next_id(),
                    env,
                );
                self.server.publish(&frame);
            }
            if !soil.is_empty() {
                let frame =
                    TelemetryFrame::snapshot(Channel::HistoricalSoil, self.sequence.next_id(), soil);
                self.server.publish(&frame);
            }
        }

        self.health
            .update(COMPONENT, true, "historical frames published");
    }
}

/// Snapshot frames for a newly connected subscriber; empty channels are
/// skipped so the client only receives frames that carry readings
fn snapshot_frames(cache: &ChannelCache, sequence: &FrameSequence) -> Vec<TelemetryFrame> {
    Channel::ALL
        .iter()
        .filter_map(|&channel| {
            let readings = cache.snapshot(channel);
            if readings.is_empty() {
                return None;
            }
            Some(TelemetryFrame::snapshot(
                channel,
                sequence.next_id(),
                readings,
            ))
        })
        .collect()
}
