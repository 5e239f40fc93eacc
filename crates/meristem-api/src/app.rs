use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Assemble the HTTP surface. Bootstrap, login and invitation acceptance
/// are reachable without a token; the WebSocket authenticates in-band;
/// everything else sits behind the bearer middleware.
pub fn build_app(state: AppState, ws_path: &str) -> Router {
    let protected = Router::new()
        .route("/api/v1/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/api/v1/tasks/:id/result", post(handlers::submit_task_result))
        .route("/api/v1/roles", post(handlers::create_role).put(handlers::update_role))
        .route("/api/v1/invitations", post(handlers::create_invitation))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/api/v1/auth/bootstrap", post(handlers::bootstrap))
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/api/v1/invitations/accept", post(handlers::accept_invitation))
        .route(ws_path, get(ws::ws_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
