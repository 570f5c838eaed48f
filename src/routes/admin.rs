use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch},
};

/// Admin Router Module
///
/// Moderation endpoints mounted under `/admin`. The router is wrapped in the
/// staff-only layer, so regular users get 403 on every route here, including
/// the queue listing that is open to them at its unprefixed path.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/collection-points/inactive
        // The moderation queue: inactive points still pending review.
        .route(
            "/collection-points/inactive",
            get(handlers::list_inactive_points),
        )
        // PATCH /admin/collection-points/{id}/status
        // Same handler as the non-prefixed route; kept for the admin console.
        .route(
            "/collection-points/{id}/status",
            patch(handlers::update_point_status),
        )
}
