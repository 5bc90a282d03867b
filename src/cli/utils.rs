// Shared utility functions for CLI commands

use anyhow::Result;
use delegation_indexer::config::{Config, ConfigOverrides};
use delegation_indexer::constants;
use std::path::{Path, PathBuf};

/// Global options that locate the configuration
pub struct ConfigSource {
    /// Explicit config file; falls back to `config.yaml` when it exists
    pub path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

impl ConfigSource {
    /// Load the config file, apply overrides, validate
    pub fn resolve(&self, mut overrides: ConfigOverrides) -> Result<Config> {
        let (path, required) = match &self.path {
            Some(path) => (path.as_path(), true),
            None => (Path::new(constants::DEFAULT_CONFIG_FILE), false),
        };

        if overrides.db_path.is_none() {
            overrides.db_path = self.db_path.clone();
        }

        let config = Config::load_or_default(path, required)?.apply(&overrides);
        config.validate()?;
        log::info!("{}", config);
        Ok(config)
    }
}

/// Render a byte count for humans
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
