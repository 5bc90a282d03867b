// Serve command - ingest delegations and expose them over HTTP
use anyhow::Result;
use clap::{Args, ValueHint};
use delegation_indexer::config::ConfigOverrides;

use super::utils::ConfigSource;

#[derive(Args, Default)]
#[command(
    about = "Index delegations and serve them over HTTP",
    long_about = "Open (or create) the delegation log, catch up on past delegations from TzKT,
then poll for new ones every PollRate seconds while serving the log at
GET /xtz/delegations.

Restarts resume from the timestamp stored in the log header; nothing already
saved is fetched again. Ctrl+C or SIGTERM stops the indexer, drains open
requests and closes the log.",
    help_template = crate::clap_help!(
        examples: "  # Serve with config.yaml from the working directory\n  \
                   {bin} serve\n\n  \
                   # Poll every 30s, 500 delegations per poll\n  \
                   {bin} serve --poll-rate 30 --poll-max-size 500\n\n  \
                   # Custom listen address and log path\n  \
                   {bin} --db /var/lib/xtz/db serve --host 127.0.0.1 --port 3000\n\n  \
                   # Serve an existing log without indexing\n  \
                   {bin} serve --read-only"
    )
)]
pub struct ServeCommand {
    /// HTTP server port
    #[arg(long, env = "DELEGATIONS_PORT", help_heading = "Server Options")]
    pub port: Option<u16>,

    /// HTTP server host
    #[arg(long, env = "DELEGATIONS_HOST", help_heading = "Server Options")]
    pub host: Option<String>,

    /// Serve an existing log written by another process; nothing is indexed
    #[arg(long, help_heading = "Server Options")]
    pub read_only: bool,

    /// Seconds between two polls for new delegations
    #[arg(long, env = "DELEGATIONS_POLL_RATE", help_heading = "Indexer Options")]
    pub poll_rate: Option<u64>,

    /// Delegations fetched per poll
    #[arg(long, env = "DELEGATIONS_POLL_MAX_SIZE", help_heading = "Indexer Options")]
    pub poll_max_size: Option<usize>,

    /// TzKT API base URL
    #[arg(long, env = "DELEGATIONS_TZKT_URL", help_heading = "Indexer Options", value_hint = ValueHint::Url)]
    pub tzkt_url: Option<String>,
}

pub fn run(cmd: ServeCommand, source: ConfigSource) -> Result<()> {
    #[cfg(not(feature = "server"))]
    {
        let _ = (cmd, source);
        anyhow::bail!("Server feature is not enabled. Rebuild with --features server");
    }

    #[cfg(feature = "server")]
    {
        run_server(cmd, source)
    }
}

#[cfg(feature = "server")]
fn run_server(cmd: ServeCommand, source: ConfigSource) -> Result<()> {
    use anyhow::Context;
    use delegation_indexer::server::startup::{StartupConfig, start_server};
    use tokio::runtime::Runtime;

    let config = source.resolve(ConfigOverrides {
        poll_rate: cmd.poll_rate,
        poll_max_size: cmd.poll_max_size,
        tzkt_url: cmd.tzkt_url,
        host: cmd.host,
        port: cmd.port,
        ..Default::default()
    })?;

    let rt = Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(start_server(StartupConfig {
        config,
        read_only: cmd.read_only,
    }))
}
