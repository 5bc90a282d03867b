// Config module - config.yaml plus command-line overrides
use crate::constants;
use crate::indexer::IndexerConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process configuration
///
/// Keys keep the capitalized spelling of the historical `config.yaml`
/// (`PollRate`, `PollMaxSize`); every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Seconds between two tail polls
    pub poll_rate: u64,
    /// Page size of a tail poll
    pub poll_max_size: usize,
    pub db_path: PathBuf,
    pub tzkt_url: String,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_rate: constants::DEFAULT_POLL_RATE_SECS,
            poll_max_size: constants::DEFAULT_POLL_MAX_SIZE,
            db_path: PathBuf::from(constants::DEFAULT_DB_PATH),
            tzkt_url: constants::DEFAULT_TZKT_URL.to_string(),
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
        }
    }
}

/// Values given on the command line or through `DELEGATIONS_*` variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub poll_rate: Option<u64>,
    pub poll_max_size: Option<usize>,
    pub db_path: Option<PathBuf>,
    pub tzkt_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a map
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("could not parse config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Load `path` if it exists; a missing file yields the defaults unless `required`
    pub fn load_or_default(path: &Path, required: bool) -> Result<Self> {
        if !required && !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(poll_rate) = overrides.poll_rate {
            self.poll_rate = poll_rate;
        }
        if let Some(poll_max_size) = overrides.poll_max_size {
            self.poll_max_size = poll_max_size;
        }
        if let Some(db_path) = &overrides.db_path {
            self.db_path = db_path.clone();
        }
        if let Some(tzkt_url) = &overrides.tzkt_url {
            self.tzkt_url = tzkt_url.clone();
        }
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_rate == 0 {
            bail!("PollRate must be at least 1 second");
        }
        if self.poll_max_size == 0 || self.poll_max_size > constants::MAX_PAGE_SIZE {
            bail!(
                "PollMaxSize must be between 1 and {}, got {}",
                constants::MAX_PAGE_SIZE,
                self.poll_max_size
            );
        }
        if self.tzkt_url.trim().is_empty() {
            bail!("TzktUrl must not be empty");
        }
        if self.db_path.as_os_str().is_empty() {
            bail!("DbPath must not be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_rate)
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            poll_interval: self.poll_interval(),
            poll_max_size: self.poll_max_size,
            backfill_page_size: constants::BACKFILL_PAGE_SIZE,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "configuration:")?;
        writeln!(f, " - PollRate: every {} seconds", self.poll_rate)?;
        writeln!(f, " - PollMaxSize: {}", self.poll_max_size)?;
        writeln!(f, " - DbPath: {}", self.db_path.display())?;
        writeln!(f, " - TzktUrl: {}", self.tzkt_url)?;
        write!(f, " - Listen: {}", self.listen_addr())
    }
}
