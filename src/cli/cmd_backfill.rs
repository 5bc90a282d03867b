// Backfill command - catch up on past delegations once, then exit
use anyhow::{Context, Result};
use clap::{Args, ValueHint};
use delegation_indexer::config::ConfigOverrides;
use delegation_indexer::indexer::{Indexer, ServerLogger};
use delegation_indexer::runtime::IndexerRuntime;
use delegation_indexer::store::{DelegationStore, FileLog};
use delegation_indexer::tzkt::TzktClient;
use std::sync::Arc;
use std::time::Instant;

use super::utils::ConfigSource;

#[derive(Args)]
#[command(
    about = "Fetch past delegations once and exit",
    long_about = "Run only the catch-up phase of the indexer: fetch every delegation newer
than the log's cursor in pages of 3000, then commit them in one write and exit.

Useful to seed a log before starting the server, or to catch up a log that
a read-only server is serving. Ctrl+C abandons the pending page; pages
already fetched are still saved.",
    help_template = crate::clap_help!(
        examples: "  # Catch up the log named in config.yaml\n  \
                   {bin} backfill\n\n  \
                   # Seed a specific log from a local TzKT instance\n  \
                   {bin} --db ./db backfill --tzkt-url http://localhost:5000"
    )
)]
pub struct BackfillCommand {
    /// TzKT API base URL
    #[arg(long, env = "DELEGATIONS_TZKT_URL", value_hint = ValueHint::Url)]
    pub tzkt_url: Option<String>,
}

pub fn run(cmd: BackfillCommand, source: ConfigSource, quiet: bool) -> Result<()> {
    let config = source.resolve(ConfigOverrides {
        tzkt_url: cmd.tzkt_url,
        ..Default::default()
    })?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(async move {
        let store = Arc::new(
            FileLog::open_or_initialize(&config.db_path)
                .with_context(|| format!("Failed to open {}", config.db_path.display()))?,
        );
        let client = TzktClient::new(config.tzkt_url.clone())
            .context("Failed to create TzKT client")?;

        let runtime = IndexerRuntime::new();
        let stop_on_signal = tokio::spawn(runtime.create_shutdown_future());

        let start = Instant::now();
        let mut indexer = Indexer::new(Arc::clone(&store), client, config.indexer_config())
            .with_logger(ServerLogger::new(config.poll_interval()));
        let result = indexer.backfill_until_stopped(runtime.shutdown_signal()).await;

        stop_on_signal.abort();
        store.close();

        let summary = result.context("Failed to save past delegations")?;
        if !quiet {
            eprintln!(
                "✓ {} delegations saved from {} pages in {:.1}s",
                summary.committed,
                summary.pages,
                start.elapsed().as_secs_f64()
            );
            eprintln!("  Cursor: {}", store.cursor());
            if summary.interrupted {
                eprintln!("  Interrupted: run again to continue from the cursor");
            }
        }

        Ok(())
    })
}
