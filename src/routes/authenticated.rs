use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};

/// Headroom for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Authenticated Router Module
///
/// Every resource of the directory. Handlers receive a validated `AuthUser` and
/// use it for owner checks (`update_point`, `delete_review`, ...) and for the
/// staff check on moderation.
pub fn authenticated_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::<AppState>::new()
        // --- Collection types ---
        .route(
            "/collection-types",
            get(handlers::list_collection_types).post(handlers::create_collection_type),
        )
        .route(
            "/collection-types/{id}",
            get(handlers::get_collection_type)
                .put(handlers::update_collection_type)
                .delete(handlers::delete_collection_type),
        )
        // --- Collection points ---
        // POST always stores the point as inactive + pending, owned by the caller.
        .route(
            "/collection-points",
            get(handlers::list_points).post(handlers::create_point),
        )
        // Static segments win over `{id}` in the matcher.
        .route("/collection-points/mine", get(handlers::list_my_points))
        .route("/collection-points/active", get(handlers::list_active_points))
        .route(
            "/collection-points/inactive",
            get(handlers::list_inactive_points),
        )
        .route(
            "/collection-points/{id}",
            get(handlers::get_point)
                .put(handlers::update_point)
                .delete(handlers::delete_point),
        )
        // PATCH /collection-points/{id}/status
        // Staff only. Unknown status literals are rejected with 400.
        .route(
            "/collection-points/{id}/status",
            patch(handlers::update_point_status),
        )
        .route(
            "/collection-points/{id}/operating-hours",
            get(handlers::list_point_operating_hours)
                .post(handlers::create_point_operating_hour),
        )
        // POST /collection-points/{id}/images
        // multipart/form-data with an `image` part; the body limit follows config.
        .route(
            "/collection-points/{id}/images",
            post(handlers::upload_point_image).layer(DefaultBodyLimit::max(
                max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
            )),
        )
        // --- Operating hours ---
        .route(
            "/operating-hours",
            get(handlers::list_operating_hours).post(handlers::create_operating_hour),
        )
        // --- Reviews ---
        .route(
            "/reviews",
            get(handlers::list_reviews).post(handlers::create_review),
        )
        // GET /reviews/filter?user_id=..&point_id=..
        .route("/reviews/filter", get(handlers::filter_reviews))
        .route(
            "/reviews/{id}",
            get(handlers::get_review)
                .put(handlers::update_review)
                .delete(handlers::delete_review),
        )
}
