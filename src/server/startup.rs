// Server startup and initialization logic
// Opens the delegation log, starts the indexer task and serves the read API
// until a shutdown signal arrives.

use crate::config::Config;
use crate::constants;
use crate::error::StoreError;
use crate::indexer::{Indexer, IndexerPhase, ServerLogger};
use crate::runtime::IndexerRuntime;
use crate::server::{Server, ServerConfig};
use crate::store::{DelegationStore, FileLog};
use crate::tzkt::TzktClient;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Configuration for server startup
pub struct StartupConfig {
    pub config: Config,
    /// Serve the artifact without ingesting into it
    pub read_only: bool,
}

/// Open the artifact, turning store errors into startup failures
///
/// A read-only store expects the artifact to exist and leaves its scratch file
/// to whichever process is writing.
pub fn open_store(path: &Path, read_only: bool) -> Result<FileLog> {
    let opened = if read_only {
        FileLog::open_read_only(path)
    } else {
        FileLog::open_or_initialize(path)
    };
    opened.map_err(|e| {
        let hint = match e {
            StoreError::MalformedArtifact { .. } => {
                "Delegation log is corrupt; move it away to start from scratch"
            }
            _ => "Delegation log cannot be opened",
        };
        anyhow::Error::new(e).context(hint)
    })
}

/// Spawn the indexer into `background_tasks`; returns a watch on its phase
pub fn setup_indexer<S>(
    store: Arc<S>,
    config: &Config,
    runtime: &IndexerRuntime,
    background_tasks: &mut JoinSet<()>,
) -> Result<watch::Receiver<IndexerPhase>>
where
    S: DelegationStore + ?Sized + 'static,
{
    let client = TzktClient::new(config.tzkt_url.clone())
        .context("Failed to create TzKT client")?;

    let indexer = Indexer::new(store, client, config.indexer_config())
        .with_logger(ServerLogger::new(config.poll_interval()));
    let phase = indexer.subscribe_phase();
    let shutdown_signal = runtime.shutdown_signal();

    background_tasks.spawn(async move {
        indexer.run(shutdown_signal).await;
    });

    Ok(phase)
}

/// Main server startup function that orchestrates all initialization
pub async fn start_server(startup: StartupConfig) -> Result<()> {
    let config = startup.config;
    config.validate()?;

    let store = Arc::new(open_store(&config.db_path, startup.read_only)?);
    log::info!("[Store] Opened {} (cursor: {})", config.db_path.display(), store.cursor());

    let addr = config.listen_addr();
    let socket_addr: SocketAddr = addr.parse().context("Invalid address format")?;

    let runtime = IndexerRuntime::new();
    let mut background_tasks = JoinSet::new();

    let mut server_config = ServerConfig::from_config(&config);
    server_config.indexer_enabled = !startup.read_only;
    let mut server = Server::new(Arc::clone(&store) as Arc<dyn DelegationStore>, server_config);

    if !startup.read_only {
        let phase = setup_indexer(Arc::clone(&store), &config, &runtime, &mut background_tasks)?;
        server = server.with_phase(phase);
    }

    let listener = match tokio::net::TcpListener::bind(socket_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            runtime.wait_for_shutdown_cleanup("Indexer", &mut background_tasks).await;
            store.close();
            return Err(e).context(format!("Failed to bind to {}", addr));
        }
    };

    display_server_info(&config, &addr, startup.read_only);
    eprintln!("\nPress Ctrl+C to stop\n");

    // The shutdown future raises the stop flag, so the indexer winds down
    // while axum drains open connections
    let served = axum::serve(listener, server.router())
        .with_graceful_shutdown(runtime.create_shutdown_future())
        .await;

    runtime.wait_for_shutdown_cleanup("Server", &mut background_tasks).await;

    // No task writes to the store any more
    store.close();
    log::info!("[Store] Closed {}", config.db_path.display());

    served.context("Server error")
}

/// Display server startup information
fn display_server_info(config: &Config, addr: &str, read_only: bool) {
    eprintln!("{}", crate::server::get_ascii_art_banner(constants::VERSION));
    eprintln!("{} HTTP server started", constants::BINARY_NAME);
    eprintln!("  Delegation log: {}", config.db_path.display());
    eprintln!("  Listening: http://{}", addr);

    if read_only {
        eprintln!("  Indexer: disabled (read-only)");
    } else {
        eprintln!("  Indexer: ENABLED");
        eprintln!("    TzKT URL: {}", config.tzkt_url);
        eprintln!("    Interval: {}s", config.poll_rate);
        eprintln!("    Page size: {}", config.poll_max_size);
    }
}
