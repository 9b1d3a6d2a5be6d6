//! Health registry and status-file writer
//!
//! `update` is called from every component on every outcome and must never
//! block on I/O: it only takes the state mutex. The background worker copies
//! the map under the lock and writes the file outside it, replacing the
//! destination atomically via a temp-file rename. Render or write failures
//! are logged and non-fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Per-component health record; last writer wins
#[derive(Debug, Clone)]
pub struct HealthState {
    pub healthy: bool,
    pub detail: String,
    pub updated_at: SystemTime,
}

/// Process-wide component health map with periodic file persistence
pub struct HealthRegistry {
    states: Mutex<BTreeMap<String, HealthState>>,
    status_path: PathBuf,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthRegistry {
    pub fn new(status_path: impl Into<PathBuf>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            states: Mutex::new(BTreeMap::new()),
            status_path: status_path.into(),
            interval,
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Record a component outcome with the current wall-clock time
    pub fn update(&self, component: &str, healthy: bool, detail: impl Into<String>) {
        let mut states = self.states.lock().expect("health mutex poisoned");
        states.insert(
            component.to_string(),
            HealthState {
                healthy,
                detail: detail.into(),
                updated_at: SystemTime::now(),
            },
        );
    }

    /// Current state of one component, if it has ever reported
    pub fn state_of(&self, component: &str) -> Option<HealthState> {
        let states = self.states.lock().expect("health mutex poisoned");
        states.get(component).cloned()
    }

    /// Spawn the periodic writer
    pub fn start(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                registry.flush().await;
                tokio::select! {
                    _ = tokio::time::sleep(registry.interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            registry.flush().await;
        });

        *self.worker.lock().expect("health mutex poisoned") = Some(handle);
    }

    /// Flush once more and join the writer
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().expect("health mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Render the current snapshot and atomically replace the status file
    async fn flush(&self) {
        let snapshot = {
            let states = self.states.lock().expect("health mutex poisoned");
            states.clone()
        };

        let mut document = serde_json::Map::new();
        for (component, state) in snapshot {
            let updated_at = state
                .updated_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            document.insert(
                component,
                serde_json::json!({
                    "healthy": state.healthy,
                    "detail": state.detail,
                    "updatedAt": updated_at,
                }),
            );
        }

        let rendered = match serde_json::to_vec_pretty(&serde_json::Value::Object(document)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to render health snapshot");
                return;
            }
        };

        if let Err(e) = self.replace_status_file(&rendered).await {
            tracing::error!(
                error = %e,
                path = %self.status_path.display(),
                "Failed to persist health snapshot"
            );
        }
    }

    async fn replace_status_file(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.status_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = temp_sibling(&self.status_path);
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.status_path).await
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "health_status.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_last_writer_wins() {
        let registry = HealthRegistry::new("unused.json", Duration::from_secs(10));
        registry.update("sensor_gateway", true, "connected");
        registry.update("sensor_gateway", false, "read timed out");

        let state = registry.state_of("sensor_gateway").unwrap();
        assert!(!state.healthy);
        assert_eq!(state.detail, "read timed out");
    }

    #[tokio::test]
    async fn test_flush_writes_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status").join("health_status.json");
        let registry = Arc::new(HealthRegistry::new(&path, Duration::from_secs(60)));

        registry.update("telemetry_pipeline", true, "realtime frame published");
        registry.update("video_relay", false, "start failed");
        registry.flush().await;

        let raw = tokio::fs::read(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        assert_eq!(value["telemetry_pipeline"]["healthy"], true);
        assert_eq!(value["video_relay"]["healthy"], false);
        assert_eq!(value["video_relay"]["detail"], "start failed");
        assert!(value["telemetry_pipeline"]["updatedAt"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_stop_performs_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health_status.json");
        let registry = Arc::new(HealthRegistry::new(&path, Duration::from_secs(3600)));

        registry.start();
        registry.update("command_router", true, "mode updated");
        registry.stop().await;

        let raw = tokio::fs::read(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["command_router"]["healthy"], true);
    }
}
