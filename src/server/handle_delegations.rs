// Delegation list handler

use crate::delegation::Delegation;
use crate::error::StoreError;
use crate::server::ServerState;
use crate::server::error::{internal_error, task_join_error, unavailable};
use crate::store::Snapshot;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of `GET /xtz/delegations`, newest delegation first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationsResponse {
    #[serde(rename = "Data")]
    pub data: Vec<Delegation>,
}

pub async fn handle_delegations(State(state): State<ServerState>) -> Response {
    // read_all does blocking file I/O
    let snapshot = tokio::task::spawn_blocking({
        let store = Arc::clone(&state.store);
        move || store.read_all()
    })
    .await;

    let bytes = match snapshot {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(StoreError::Closed)) => {
            return unavailable("Delegation log is closed");
        }
        Ok(Err(e)) => {
            log::warn!("[Server] Could not read delegations: {}", e);
            return internal_error(&e.to_string());
        }
        Err(e) => return task_join_error(e),
    };

    match Snapshot::parse(&bytes) {
        Ok(snapshot) => (
            StatusCode::OK,
            axum::Json(DelegationsResponse {
                data: snapshot.data,
            }),
        )
            .into_response(),
        Err(e) => {
            log::error!("[Server] Failed to decode retrieved data: {}", e);
            internal_error("Failed to decode retrieved data")
        }
    }
}
