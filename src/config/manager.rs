//! Configuration loading and reload detection
//!
//! Loading happens synchronously before the runtime starts so the worker
//! thread count can come from the file itself. Reload detection is a
//! best-effort mtime check polled by the supervisor; it is advisory and not
//! all settings are hot-applied.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::settings::AppConfig;

/// Owns the configuration document and its on-disk identity
pub struct ConfigManager {
    path: PathBuf,
    config: AppConfig,
    last_modified: Option<SystemTime>,
}

impl ConfigManager {
    /// Load the configuration at `path`, writing a default template when the
    /// file is missing. Invalid JSON is logged and replaced with defaults in
    /// memory; the file is left untouched for the operator to fix.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = Self::read_or_init(&path);
        let last_modified = modified_time(&path);
        Self {
            path,
            config,
            last_modified,
        }
    }

    pub fn get(&self) -> &AppConfig {
        &self.config
    }

    /// Re-parse the file if its mtime changed since the last load
    pub fn reload_if_changed(&mut self) -> bool {
        let Some(current) = modified_time(&self.path) else {
            return false;
        };
        if Some(current) == self.last_modified {
            return false;
        }

        self.config = Self::read_or_init(&self.path);
        self.last_modified = Some(current);
        tracing::info!(path = %self.path.display(), "Configuration reloaded");
        true
    }

    fn read_or_init(path: &Path) -> AppConfig {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                let defaults = AppConfig::default();
                if let Err(e) = write_default(path, &defaults) {
                    tracing::error!(
                        error = %e,
                        path = %path.display(),
                        "Failed to write default configuration template"
                    );
                } else {
                    tracing::warn!(
                        path = %path.display(),
                        "Configuration file missing; a default template was created"
                    );
                }
                return defaults;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse configuration; using defaults"
                );
                AppConfig::default()
            }
        }
    }
}

fn write_default(path: &Path, defaults: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let rendered = serde_json::to_string_pretty(defaults)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(path, rendered)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
