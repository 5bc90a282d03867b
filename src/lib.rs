//! Tezos delegation indexer
//!
//! Mirrors delegation operations from the TzKT API into a resumable local log
//! and serves that log read-only over HTTP.
//!
//! - [`store`]: the persisted log (`FileLog`) behind the [`store::DelegationStore`] trait
//! - [`tzkt`]: the remote feed client behind the [`tzkt::DelegationFeed`] trait
//! - [`indexer`]: backfill-then-tail ingestion engine
//! - [`server`]: axum read API and process startup (feature `server`)
//!
//! ```no_run
//! use delegation_indexer::{FileLog, Indexer, IndexerConfig, TzktClient};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(FileLog::open_or_initialize("db")?);
//! let client = TzktClient::new("https://api.tzkt.io")?;
//! let mut indexer = Indexer::new(store, client, IndexerConfig::default());
//! indexer.backfill().await?;
//! indexer.poll_once().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod delegation;
pub mod error;
pub mod indexer;
pub mod runtime;
pub mod store;
pub mod tzkt;

#[cfg(feature = "server")]
pub mod server;

pub use config::Config;
pub use delegation::{Delegation, DelegationResponse};
pub use error::{FetchError, StoreError};
pub use indexer::{Indexer, IndexerConfig, IndexerLogger, IndexerPhase, NoopLogger, ServerLogger};
pub use runtime::IndexerRuntime;
pub use store::{DelegationStore, FileLog, MemoryStore, Snapshot};
pub use tzkt::{DelegationFeed, TzktClient};
