//! Delegation records as stored in the log and as returned by the remote feed
use serde::{Deserialize, Serialize};

/// A delegation event as persisted in the log
///
/// Field names follow the legacy artifact encoding, so existing `db` files
/// remain readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Delegation {
    pub timestamp: String,
    pub amount: u64,
    pub sender: String,
    pub level: u64,
}

impl Delegation {
    pub fn new(timestamp: impl Into<String>, amount: u64, sender: impl Into<String>, level: u64) -> Self {
        Self {
            timestamp: timestamp.into(),
            amount,
            sender: sender.into(),
            level,
        }
    }
}

/// Account reference nested in a remote delegation payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRef {
    #[serde(default)]
    pub address: String,
}

/// A delegation operation as returned by the TzKT API
///
/// Only the fields the log keeps are decoded; the rest of the payload is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationResponse {
    pub timestamp: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub sender: SenderRef,
    pub level: u64,
}

impl DelegationResponse {
    pub fn new(timestamp: impl Into<String>, amount: u64, sender: impl Into<String>, level: u64) -> Self {
        Self {
            timestamp: timestamp.into(),
            amount,
            sender: SenderRef {
                address: sender.into(),
            },
            level,
        }
    }
}

impl From<DelegationResponse> for Delegation {
    fn from(resp: DelegationResponse) -> Self {
        Self {
            timestamp: resp.timestamp,
            amount: resp.amount,
            sender: resp.sender.address,
            level: resp.level,
        }
    }
}

/// Converts a fetched batch into log order (newest first)
///
/// The remote hands pages out oldest-first. The batch is stably ordered by
/// timestamp and then reversed, so records sharing a timestamp end up in
/// reverse arrival order.
pub fn normalize_batch(fetched: Vec<DelegationResponse>) -> Vec<Delegation> {
    let mut batch: Vec<Delegation> = fetched.into_iter().map(Delegation::from).collect();
    batch.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    batch.reverse();
    batch
}

/// Splits off records older than `cursor`
///
/// Returns `(kept, stale)`. Both keep the input order.
pub fn split_stale(batch: Vec<Delegation>, cursor: &str) -> (Vec<Delegation>, Vec<Delegation>) {
    batch
        .into_iter()
        .partition(|d| d.timestamp.as_str() >= cursor)
}
