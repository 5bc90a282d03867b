#![allow(dead_code)]

use anyhow::Result;
use delegation_indexer::{Delegation, DelegationResponse, DelegationStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub fn setup_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("db")
}

/// Delegation `n` seconds after 2024-01-01T00:00:00Z
pub fn delegation(n: u32, sender: &str) -> Delegation {
    Delegation::new(timestamp(n), 1000 + n as u64, sender, 5_000_000 + n as u64)
}

pub fn response(n: u32, sender: &str) -> DelegationResponse {
    let d = delegation(n, sender);
    DelegationResponse::new(d.timestamp, d.amount, d.sender, d.level)
}

pub fn timestamp(n: u32) -> String {
    format!(
        "2024-01-01T{:02}:{:02}:{:02}Z",
        n / 3600,
        (n / 60) % 60,
        n % 60
    )
}

/// Newest-first batch for seconds `from..to`
pub fn batch(from: u32, to: u32) -> Vec<Delegation> {
    (from..to).rev().map(|n| delegation(n, "tz1batch")).collect()
}

/// Bind 127.0.0.1 on a free port and serve `app` in the background
#[cfg(feature = "server")]
pub async fn spawn_app(app: axum::Router) -> Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((handle, addr))
}

#[cfg(feature = "server")]
pub async fn start_test_server(
    store: Arc<dyn DelegationStore>,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    let config = delegation_indexer::server::ServerConfig {
        version: "test".to_string(),
        poll_interval_seconds: 10,
        tzkt_url: "http://localhost:1234".to_string(),
        indexer_enabled: false,
    };
    let server = delegation_indexer::server::Server::new(store, config);
    spawn_app(server.router()).await
}

/// In-process stand-in for the TzKT delegations endpoint
///
/// Serves `timestamp.gt` / `limit` queries oldest-first over a fixed history
/// and records every query it receives.
#[cfg(feature = "server")]
#[derive(Clone, Default)]
pub struct MockTzkt {
    pub history: Arc<std::sync::Mutex<Vec<DelegationResponse>>>,
    pub queries: Arc<std::sync::Mutex<Vec<(String, usize)>>>,
    /// Answer this many requests with the given status before serving data
    pub failures: Arc<std::sync::Mutex<Vec<u16>>>,
}

#[cfg(feature = "server")]
impl MockTzkt {
    pub fn with_history(history: Vec<DelegationResponse>) -> Self {
        let mock = Self::default();
        *mock.history.lock().unwrap() = history;
        mock
    }

    pub fn push(&self, delegation: DelegationResponse) {
        self.history.lock().unwrap().push(delegation);
    }

    pub fn fail_next(&self, statuses: &[u16]) {
        self.failures.lock().unwrap().extend_from_slice(statuses);
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }

    pub async fn start(&self) -> Result<(tokio::task::JoinHandle<()>, String)> {
        use axum::extract::{Query, State};
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::IntoResponse;
        use std::collections::HashMap;

        async fn delegations(
            State(mock): State<MockTzkt>,
            Query(params): Query<HashMap<String, String>>,
        ) -> axum::response::Response {
            let failure = {
                let mut failures = mock.failures.lock().unwrap();
                (!failures.is_empty()).then(|| failures.remove(0))
            };
            if let Some(status) = failure {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", "0".parse().unwrap());
                return (StatusCode::from_u16(status).unwrap(), headers, "").into_response();
            }

            let after = params.get("timestamp.gt").cloned().unwrap_or_default();
            let limit: usize = params
                .get("limit")
                .and_then(|l| l.parse().ok())
                .unwrap_or(100);
            mock.queries.lock().unwrap().push((after.clone(), limit));

            let mut page: Vec<DelegationResponse> = mock
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.timestamp > after)
                .cloned()
                .collect();
            page.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            page.truncate(limit);
            axum::Json(page).into_response()
        }

        let app = axum::Router::new()
            .route(
                delegation_indexer::constants::DELEGATIONS_ENDPOINT,
                axum::routing::get(delegations),
            )
            .with_state(self.clone());
        let (handle, addr) = spawn_app(app).await?;
        Ok((handle, format!("http://{}", addr)))
    }
}
