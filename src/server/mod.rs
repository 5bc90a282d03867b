// HTTP server exposing the delegation log read-only

mod config;
mod error;
mod handle_delegations;
mod handle_root;
mod handle_status;
mod routes;
pub mod startup;

use crate::indexer::IndexerPhase;
use crate::store::DelegationStore;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

pub use config::ServerConfig;
pub use handle_delegations::{DelegationsResponse, handle_delegations};
pub use handle_root::handle_root;
pub use handle_status::handle_status;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn DelegationStore>,
    pub config: ServerConfig,
    pub start_time: Instant,
    pub phase: Option<watch::Receiver<IndexerPhase>>,
}

impl ServerState {
    /// Phase of the indexer feeding the store, if one runs in this process
    pub fn indexer_phase(&self) -> Option<IndexerPhase> {
        self.phase.as_ref().map(|rx| *rx.borrow())
    }
}

pub struct Server {
    store: Arc<dyn DelegationStore>,
    config: ServerConfig,
    start_time: Instant,
    phase: Option<watch::Receiver<IndexerPhase>>,
}

impl Server {
    pub fn new(store: Arc<dyn DelegationStore>, config: ServerConfig) -> Self {
        Self {
            store,
            config,
            start_time: Instant::now(),
            phase: None,
        }
    }

    /// Report the phase of the indexer writing to the store
    pub fn with_phase(mut self, phase: watch::Receiver<IndexerPhase>) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn router(&self) -> Router {
        routes::create_router(ServerState {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            start_time: self.start_time,
            phase: self.phase.clone(),
        })
    }
}

/// ASCII banner shown on `/` and at startup
pub fn get_ascii_art_banner(version: &str) -> String {
    format!(
        concat!(
            "   _  __ __ ____ \n",
            "  | |/ //_//_  / \n",
            "  |   <     / /_   delegations\n",
            "  |_|\\_\\   /___/   v{}\n",
        ),
        version
    )
}
