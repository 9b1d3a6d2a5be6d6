//! fieldlink service binary
//!
//! Loads configuration synchronously so the worker thread count can come
//! from the file, then hands control to the supervisor.

use std::process::ExitCode;

use fieldlink::config::ConfigManager;
use fieldlink::supervisor;

const DEFAULT_CONFIG_PATH: &str = "config/app_config.json";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let manager = ConfigManager::load(&config_path);
    let worker_threads = usize::from(manager.get().publisher.worker_threads.max(1));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(supervisor::run(manager)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
