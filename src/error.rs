//! Error types for the delegation log store and the remote feed client

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`crate::store::DelegationStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The artifact could not be opened or created
    #[error("storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact exists but does not have the expected layout
    #[error("malformed artifact at {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    /// A commit failed; the previous artifact is still in place
    #[error("could not persist delegations: {0}")]
    PersistenceWrite(String),

    /// A batch head timestamp that cannot be stored in the fixed-width cursor field
    #[error("invalid cursor timestamp {0:?}: expected {len} characters", len = crate::constants::TIMESTAMP_LEN)]
    InvalidTimestamp(String),

    /// The log was opened read-only
    #[error("store is read-only")]
    ReadOnly,

    /// The store was closed
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceWrite(message.into())
    }
}

/// Errors raised by a [`crate::tzkt::DelegationFeed`]
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure or timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("remote answered {0}")]
    Status(u16),

    /// Rate limited (429)
    #[error("rate limited by remote feed")]
    RateLimited,

    /// Payload could not be decoded
    #[error("could not decode remote payload: {0}")]
    Decode(String),

    /// Every retry failed
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: Box<FetchError> },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}
