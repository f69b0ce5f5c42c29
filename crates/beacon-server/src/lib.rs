pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod room_store;
pub mod state;
pub mod ws;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware;
use tower_http::cors::{Any, CorsLayer};

use config::BeaconConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: BeaconConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);

    // Read-side API routes (behind bearer auth middleware when configured)
    let api_routes = Router::new()
        .route("/rooms", axum::routing::get(api::list_rooms))
        .route(
            "/rooms/{room_id}/history",
            axum::routing::get(api::room_history),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .nest("/api/v1", api_routes)
        .route("/healthz", axum::routing::get(health::health_check))
        .route("/readyz", axum::routing::get(health::readiness_check))
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .with_state(state.clone());

    (app, state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    auth::require_bearer(&state.config.auth.bearer_token, request, next).await
}
