use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod storage;

// Routing split by access level (public, authenticated, admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AppError;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_collection_types, handlers::create_collection_type,
        handlers::get_collection_type, handlers::update_collection_type,
        handlers::delete_collection_type,
        handlers::list_points, handlers::create_point, handlers::get_point,
        handlers::update_point, handlers::delete_point, handlers::list_my_points,
        handlers::list_active_points, handlers::list_inactive_points,
        handlers::update_point_status,
        handlers::list_operating_hours, handlers::create_operating_hour,
        handlers::list_point_operating_hours, handlers::create_point_operating_hour,
        handlers::list_reviews, handlers::create_review, handlers::get_review,
        handlers::update_review, handlers::delete_review, handlers::filter_reviews,
        handlers::upload_point_image
    ),
    components(
        schemas(
            models::CollectionType, models::CollectionTypeRequest,
            models::CollectionPoint, models::CreatePointRequest, models::UpdatePointRequest,
            models::PointStatus, models::PointStatusUpdateRequest,
            models::OperatingHour, models::OperatingHourRequest,
            models::PointReview, models::CreateReviewRequest, models::UpdateReviewRequest,
            models::PointImage, models::PointImageUploadForm,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "eco-map", description = "Eco collection point directory API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cloneable container for the repository, the storage service and the
/// loaded configuration.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub storage: StorageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request with 401 before routing when `AuthUser` cannot be resolved.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Guards the `/admin` prefix: the caller must be authenticated and staff, so
/// every route nested there answers 403 to regular users.
async fn admin_middleware(
    auth_user: AuthUser,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    auth_user.require_staff()?;
    Ok(next.run(request).await)
}

/// create_router
///
/// Assembles the routing tree, applies authentication to the protected modules
/// and wraps everything in the request-id, tracing and CORS layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes(state.config.max_upload_bytes).route_layer(
                middleware::from_fn_with_state(state.clone(), auth_middleware),
            ),
        )
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                admin_middleware,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer` carrying method, URI and the `x-request-id` set above,
/// so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
