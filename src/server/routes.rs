// Route setup and configuration

use crate::server::ServerState;
use crate::server::{handle_delegations, handle_root, handle_status};
use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Every route answers GET only; axum replies 405 to other methods
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/status", get(handle_status))
        .route("/xtz/delegations", get(handle_delegations))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}
