// Server configuration

#[derive(Clone)]
pub struct ServerConfig {
    pub version: String,
    pub poll_interval_seconds: u64,
    pub tzkt_url: String,
    /// False when the server only reads an artifact another process writes
    pub indexer_enabled: bool,
}

impl ServerConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            version: crate::constants::VERSION.to_string(),
            poll_interval_seconds: config.poll_rate,
            tzkt_url: config.tzkt_url.clone(),
            indexer_enabled: true,
        }
    }
}
