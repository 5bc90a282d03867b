// Root page handler

use crate::constants;
use crate::server::ServerState;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};

pub async fn handle_root(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    let phase = state
        .indexer_phase()
        .map(|phase| phase.as_str())
        .unwrap_or("disabled");

    let mut response = String::new();
    response.push('\n');
    response.push_str(&crate::server::get_ascii_art_banner(&state.config.version));
    response.push('\n');
    response.push_str(&format!("  {} server\n\n", constants::BINARY_NAME));

    response.push_str("Indexer\n");
    response.push_str("━━━━━━━\n");
    response.push_str(&format!("  Phase:     {}\n", phase));
    response.push_str(&format!("  Cursor:    {}\n", state.store.cursor()));
    response.push_str(&format!("  Source:    {}\n", state.config.tzkt_url));
    response.push_str(&format!(
        "  Interval:  {}s\n",
        state.config.poll_interval_seconds
    ));
    response.push_str(&format!("  Uptime:    {}s\n\n", uptime.as_secs()));

    response.push_str("Endpoints\n");
    response.push_str("━━━━━━━━━\n");
    response.push_str("  GET /xtz/delegations   All delegations, newest first\n");
    response.push_str("  GET /status            Indexer and server status (JSON)\n");

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        response,
    )
}
