//! Process lifecycle
//!
//! Wires the components together in dependency order, installs signal
//! handling, polls for configuration reload requests, and tears everything
//! down in reverse order on shutdown. Only startup failures escape this
//! module; the process then exits non-zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};

use crate::cache::ChannelCache;
use crate::command::CommandRouter;
use crate::config::ConfigManager;
use crate::error::{Error, Result};
use crate::gateway::{DeviceGateway, ModbusTransport};
use crate::health::HealthRegistry;
use crate::pipeline::TelemetryPipeline;
use crate::repository::{HistoryRepository, HistorySource};
use crate::server::TelemetryServer;
use crate::video::VideoRelay;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Reload request flag raised by the command plane and consumed by the
/// supervisor's poll loop
#[derive(Debug, Clone, Default)]
pub struct ReloadSignal(Arc<AtomicBool>);

impl ReloadSignal {
    /// Raise the flag
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Consume the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Run the service until an interrupt or terminate signal arrives
pub async fn run(mut manager: ConfigManager) -> Result<()> {
    let config = manager.get().clone();

    let health = Arc::new(HealthRegistry::new(
        &config.health.status_file,
        Duration::from_secs(config.health.interval_seconds),
    ));
    health.start();

    let repository = match HistoryRepository::connect(config.database.clone(), Arc::clone(&health))
        .await
    {
        Ok(repository) => Arc::new(repository),
        Err(e) => {
            health.stop().await;
            return Err(Error::Startup(format!("database connect failed: {e}")));
        }
    };

    let gateway = Arc::new(DeviceGateway::new(
        config.sensor.clone(),
        Box::new(ModbusTransport::new(
            config.sensor.endpoint.clone(),
            config.sensor.port,
        )),
        Arc::clone(&health),
    ));

    let reload = ReloadSignal::default();
    let router = Arc::new(CommandRouter::new(
        Arc::clone(&gateway),
        Arc::clone(&health),
        reload.clone(),
    ));

    let server = Arc::new(TelemetryServer::new(
        config.publisher.clone(),
        Arc::clone(&router),
        Arc::clone(&health),
    ));
    install_diagnostics(&router, &server, &config);

    if let Err(e) = server.start().await {
        health.stop().await;
        return Err(Error::Startup(format!("telemetry listener failed: {e}")));
    }

    let cache = Arc::new(ChannelCache::new(usize::from(config.pipeline.cache_size)));
    let pipeline = Arc::new(TelemetryPipeline::new(
        config.pipeline.clone(),
        Arc::clone(&repository) as Arc<dyn HistorySource>,
        Arc::clone(&gateway),
        Arc::clone(&server),
        cache,
        Arc::clone(&health),
    ));
    pipeline.install_snapshot_provider();
    pipeline.start();

    let video = Arc::new(VideoRelay::new(Arc::clone(&health)));
    if let Err(e) = video.start(config.video.port).await {
        tracing::warn!(error = %e, "Video relay failed to start");
    }

    tracing::info!("fieldlink edge service is running");
    let outcome = wait_for_shutdown(&mut manager, &reload).await;

    // Reverse of construction order.
    video.stop().await;
    pipeline.stop().await;
    server.stop().await;
    gateway.disconnect().await;
    health.stop().await;

    outcome
}

/// Build the diagnostics document served over the command plane
fn install_diagnostics(
    router: &Arc<CommandRouter>,
    server: &Arc<TelemetryServer>,
    config: &crate::config::AppConfig,
) {
    let server: Weak<TelemetryServer> = Arc::downgrade(server);
    let realtime_seconds = config.pipeline.realtime_seconds;
    let historical_seconds = config.pipeline.historical_seconds;

    router.set_diagnostics_provider(Box::new(move || {
        let subscribers = server
            .upgrade()
            .map_or(false, |server| server.has_subscribers());
        serde_json::json!({
            "telemetry": { "subscribers": subscribers },
            "pipeline": {
                "realtimeSeconds": realtime_seconds,
                "historicalSeconds": historical_seconds,
            },
        })
    }));
}

async fn wait_for_shutdown(manager: &mut ConfigManager, reload: &ReloadSignal) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("Interrupt received; shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("Terminate received; shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if reload.take() {
                    if manager.reload_if_changed() {
                        tracing::info!(
                            "Configuration reload requested; runtime hot-reload is not \
                             guaranteed for all services"
                        );
                    }
                } else {
                    manager.reload_if_changed();
                }
            }
        }
    }
}
