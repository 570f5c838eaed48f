use crate::AppState;
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints reachable without credentials. Every collection point resource
/// requires authentication, so only the liveness probe lives here.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Used by the load balancer and docker-compose health checks.
        .route("/health", get(|| async { "ok" }))
}
