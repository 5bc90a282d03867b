use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

// CLI Commands (cmd_ prefix)
mod cmd_backfill;
mod cmd_serve;
mod cmd_status;

// Helper modules (no cmd_ prefix)
mod logger;
mod utils;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(bin_name = "delegation-indexer")]
#[command(version = VERSION)]
#[command(about = concat!("delegation-indexer v", env!("CARGO_PKG_VERSION"), " - Tezos delegation mirror"))]
#[command(long_about = concat!(
    "delegation-indexer v", env!("CARGO_PKG_VERSION"), " - Tezos delegation mirror\n\n",
    "Mirrors Tezos delegation operations from the TzKT API into a local,\n",
    "resumable log and serves it over HTTP at /xtz/delegations.\n\n",
    "Runs the server when no command is given."
))]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (PollRate, PollMaxSize, DbPath, TzktUrl, Host, Port)
    #[arg(short = 'c', long = "config", global = true, env = "DELEGATIONS_CONFIG", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Delegation log path (overrides DbPath)
    #[arg(long = "db", global = true, env = "DELEGATIONS_DB_PATH", value_hint = ValueHint::FilePath)]
    db_path: Option<PathBuf>,

    /// Suppress informational output
    #[arg(long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Serve(cmd_serve::ServeCommand),
    Status(cmd_status::StatusCommand),
    Backfill(cmd_backfill::BackfillCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger based on verbosity flags
    logger::init_logger(cli.verbose, cli.quiet);

    let config = utils::ConfigSource {
        path: cli.config,
        db_path: cli.db_path,
    };

    match cli.command.unwrap_or_else(|| Commands::Serve(Default::default())) {
        Commands::Serve(cmd) => cmd_serve::run(cmd, config)?,
        Commands::Status(cmd) => cmd_status::run(cmd, config)?,
        Commands::Backfill(cmd) => cmd_backfill::run(cmd, config, cli.quiet)?,
    }

    Ok(())
}

/// Macro to create clap help templates with examples
/// This works around the limitation that {bin} doesn't work in after_help
/// Uses env! macro to get binary name at compile time
#[macro_export]
macro_rules! clap_help {
    (examples: $examples:literal) => {{
        const BIN: &str = env!("CARGO_PKG_NAME");
        concat!(
            "{about-with-newline}\n",
            "{usage-heading} {usage}\n\n",
            "{all-args}\n\n",
            "Examples:\n",
            $examples
        ).replace("{bin}", BIN)
    }};
}
