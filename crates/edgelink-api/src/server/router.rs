//! Application router configuration.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

use super::types::{ServerState, MAX_REQUEST_BODY_SIZE};
use crate::handlers::{basic, commands, discovery};

/// Base path of every route.
pub const API_BASE: &str = "/api/v3";

/// Create the application router with a specific state.
pub fn create_router_with_state(state: ServerState) -> Router {
    let api = Router::new()
        .route("/ping", get(basic::ping_handler))
        .route("/version", get(basic::version_handler))
        .route("/config", get(basic::config_handler))
        .route("/metrics", get(basic::metrics_handler))
        .route(
            "/device/name/:name/:command",
            get(commands::get_command_handler).put(commands::set_command_handler),
        )
        .route(
            "/discovery",
            post(discovery::discovery_handler).delete(discovery::stop_discovery_handler),
        )
        .route(
            "/discovery/request-id/:id",
            delete(discovery::stop_discovery_by_id_handler),
        )
        .route("/profilescan", post(discovery::profile_scan_handler))
        .route(
            "/profilescan/device/name/:name",
            delete(discovery::stop_profile_scan_handler),
        );

    Router::new()
        .nest(API_BASE, api)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .with_state(state)
}
