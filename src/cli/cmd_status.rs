// Status command - summarize the delegation log without modifying it
use anyhow::{Context, Result};
use clap::Args;
use delegation_indexer::config::ConfigOverrides;
use delegation_indexer::constants;
use delegation_indexer::store::Snapshot;
use serde_json::json;
use std::path::Path;

use super::utils::{self, ConfigSource};

#[derive(Args)]
#[command(
    about = "Show the state of the delegation log",
    long_about = "Print the cursor, the number of stored delegations and the oldest and newest
entries of the delegation log.

The log is read, never written: it is safe to run while a server is indexing
into the same file. Use --json for machine-readable output.",
    help_template = crate::clap_help!(
        examples: "  # Show log status\n  \
                   {bin} status\n\n  \
                   # JSON output for scripting\n  \
                   {bin} --db /var/lib/xtz/db status --json"
    )
)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

struct LogStatus {
    exists: bool,
    size_bytes: u64,
    snapshot: Option<Snapshot>,
}

pub fn run(cmd: StatusCommand, source: ConfigSource) -> Result<()> {
    let config = source.resolve(ConfigOverrides::default())?;
    let status = read_status(&config.db_path)?;

    if cmd.json {
        print_json_status(&config.db_path, &status)?;
    } else {
        print_human_status(&config.db_path, &status);
    }

    Ok(())
}

fn read_status(path: &Path) -> Result<LogStatus> {
    if !path.exists() {
        return Ok(LogStatus {
            exists: false,
            size_bytes: 0,
            snapshot: None,
        });
    }

    // A plain read; opening a FileLog would clean up a live writer's scratch file
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot = if bytes.is_empty() {
        None
    } else {
        Some(
            Snapshot::parse(&bytes)
                .with_context(|| format!("Delegation log {} is malformed", path.display()))?,
        )
    };

    Ok(LogStatus {
        exists: true,
        size_bytes: bytes.len() as u64,
        snapshot,
    })
}

fn cursor_of(status: &LogStatus) -> &str {
    status
        .snapshot
        .as_ref()
        .map(|s| s.last_timestamp.as_str())
        .unwrap_or(constants::ZERO_TIMESTAMP)
}

fn print_human_status(path: &Path, status: &LogStatus) {
    println!("Delegation Log Status");
    println!("═════════════════════════════════════════════");
    println!("  Path:        {}", path.display());

    if !status.exists {
        println!("  State:       not created yet");
        println!();
        println!("  Run '{} serve' or '{} backfill' to create it.", constants::BINARY_NAME, constants::BINARY_NAME);
        return;
    }

    let count = status.snapshot.as_ref().map(|s| s.data.len()).unwrap_or(0);
    println!("  Size:        {}", utils::format_bytes(status.size_bytes));
    println!("  Cursor:      {}", cursor_of(status));
    println!("  Delegations: {}", count);

    if let Some(snapshot) = &status.snapshot
        && let (Some(newest), Some(oldest)) = (snapshot.data.first(), snapshot.data.last())
    {
        println!();
        println!(
            "  Newest:      {} (level {}, {} mutez from {})",
            newest.timestamp, newest.level, newest.amount, newest.sender
        );
        println!(
            "  Oldest:      {} (level {}, {} mutez from {})",
            oldest.timestamp, oldest.level, oldest.amount, oldest.sender
        );
    }
}

fn print_json_status(path: &Path, status: &LogStatus) -> Result<()> {
    let data = status.snapshot.as_ref().map(|s| s.data.as_slice()).unwrap_or(&[]);
    let response = json!({
        "path": path.display().to_string(),
        "exists": status.exists,
        "size_bytes": status.size_bytes,
        "cursor": cursor_of(status),
        "count": data.len(),
        "newest": data.first(),
        "oldest": data.last(),
    });
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
