// Status handler

use crate::server::ServerState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

pub async fn handle_status(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let phase = state
        .indexer_phase()
        .map(|phase| phase.as_str())
        .unwrap_or("disabled");

    let response = json!({
        "server": {
            "version": state.config.version,
            "uptime_seconds": uptime,
        },
        "indexer": {
            "enabled": state.config.indexer_enabled,
            "phase": phase,
            "cursor": state.store.cursor(),
            "poll_interval_seconds": state.config.poll_interval_seconds,
            "tzkt_url": state.config.tzkt_url,
        },
    });

    (StatusCode::OK, axum::Json(response))
}
