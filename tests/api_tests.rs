use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use eco_map::{
    AppConfig, AppState, InMemoryRepository, MockStorageService, create_router,
    models::{CollectionPoint, PointImage, User},
    repository::RepositoryState,
    storage::StorageState,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const OWNER: i64 = 1;
const OTHER: i64 = 2;
const ADMIN: i64 = 9;
const BOUNDARY: &str = "eco-map-test-boundary";

struct TestApp {
    router: Router,
    storage: Arc<MockStorageService>,
}

async fn spawn_app_with(config: AppConfig, storage: MockStorageService) -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    for (id, is_staff) in [(OWNER, false), (OTHER, false), (ADMIN, true)] {
        repo.insert_user(User {
            id,
            email: format!("user{id}@eco.test"),
            is_staff,
        })
        .await;
    }

    let storage = Arc::new(storage);
    let state = AppState {
        repo: repo as RepositoryState,
        storage: storage.clone() as StorageState,
        config,
    };

    TestApp {
        router: create_router(state),
        storage,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(AppConfig::default(), MockStorageService::new()).await
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn json(
        &self,
        method: Method,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn submit_point(&self, owner: i64) -> CollectionPoint {
        let (status, body) = self
            .json(
                Method::POST,
                "/collection-points",
                Some(owner),
                Some(json!({
                    "name": "Ecoponto Pinheiros",
                    "address": "Rua Paes Leme, 100",
                    "latitude": -23.566,
                    "longitude": -46.693
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body).unwrap()
    }

    async fn upload(
        &self,
        point_id: i64,
        user: i64,
        field: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/collection-points/{point_id}/images"))
            .header("x-user-id", user.to_string())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

// --- Infrastructure ---

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let app = spawn_app().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_openapi_document_lists_moderation_route() {
    let app = spawn_app().await;
    let (status, body) = app
        .json(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/collection-points/{id}/status"]["patch"].is_object());
    assert!(body["paths"]["/collection-points/{id}/operating-hours"]["get"].is_object());
    assert!(body["paths"]["/collection-points/{id}/operating-hours"]["post"].is_object());
}

// --- Authentication ---

#[tokio::test]
async fn test_anonymous_requests_are_rejected() {
    let app = spawn_app().await;
    for uri in ["/collection-points", "/reviews", "/admin/collection-points/inactive"] {
        let (status, body) = app.json(Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["error"], "authentication_required");
    }
}

#[tokio::test]
async fn test_unknown_dev_user_is_rejected() {
    let app = spawn_app().await;
    let (status, _) = app
        .json(Method::GET, "/collection-points", Some(404), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// --- Moderation lifecycle ---

#[tokio::test]
async fn test_submission_and_approval_flow() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;
    assert_eq!(point.status.as_str(), "pending");

    let (_, queue) = app
        .json(Method::GET, "/collection-points/inactive", Some(ADMIN), None)
        .await;
    assert_eq!(queue.as_array().unwrap().len(), 1);

    let (status, body) = app
        .json(
            Method::PATCH,
            &format!("/collection-points/{}/status", point.id),
            Some(ADMIN),
            Some(json!({"is_active": true, "status": "approved"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["is_active"], true);

    let (_, active) = app
        .json(Method::GET, "/collection-points/active", Some(OTHER), None)
        .await;
    assert_eq!(active.as_array().unwrap().len(), 1);

    let (_, queue) = app
        .json(Method::GET, "/admin/collection-points/inactive", Some(ADMIN), None)
        .await;
    assert!(queue.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_prefixed_moderation_route() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .json(
            Method::PATCH,
            &format!("/admin/collection-points/{}/status", point.id),
            Some(ADMIN),
            Some(json!({"status": "rejected"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["is_active"], false);
}

#[tokio::test]
async fn test_admin_prefix_is_staff_only() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .json(Method::GET, "/admin/collection-points/inactive", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, _) = app
        .json(
            Method::PATCH,
            &format!("/admin/collection-points/{}/status", point.id),
            Some(OTHER),
            Some(json!({"is_active": true})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The unprefixed queue stays open to any authenticated user.
    let (status, queue) = app
        .json(Method::GET, "/collection-points/inactive", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_non_admin_moderation_is_forbidden_before_body_parsing() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .json(
            Method::PATCH,
            &format!("/collection-points/{}/status", point.id),
            Some(OWNER),
            Some(json!({"is_active": true, "status": "approved"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let request = Request::builder()
        .method(Method::PATCH)
        .uri("/collection-points/9999/status")
        .header("x-user-id", OTHER.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_status_returns_field_error() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .json(
            Method::PATCH,
            &format!("/collection-points/{}/status", point.id),
            Some(ADMIN),
            Some(json!({"is_active": true, "status": "archived"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["fields"]["status"].is_array());

    let (_, fetched) = app
        .json(
            Method::GET,
            &format!("/collection-points/{}", point.id),
            Some(OWNER),
            None,
        )
        .await;
    assert_eq!(fetched["is_active"], false);
    assert_eq!(fetched["status"], "pending");
}

#[tokio::test]
async fn test_invalid_point_payload_lists_fields() {
    let app = spawn_app().await;
    let (status, body) = app
        .json(
            Method::POST,
            "/collection-points",
            Some(OWNER),
            Some(json!({
                "name": "",
                "address": "Rua X, 1",
                "latitude": 91.0,
                "longitude": 0.0
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["name"].is_array());
    assert!(body["fields"]["latitude"].is_array());
}

#[tokio::test]
async fn test_malformed_json_is_a_validation_error() {
    let app = spawn_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/collection-points")
        .header("x-user-id", OWNER.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let (status, bytes) = app.send(request).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_whitespace_only_name_is_rejected() {
    let app = spawn_app().await;
    let (status, body) = app
        .json(
            Method::POST,
            "/collection-points",
            Some(OWNER),
            Some(json!({
                "name": "   ",
                "address": "Rua X, 1",
                "latitude": 0.0,
                "longitude": 0.0
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["name"].is_array());

    let (status, body) = app
        .json(
            Method::POST,
            "/collection-types",
            Some(ADMIN),
            Some(json!({"name": " "})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["name"].is_array());
}

#[tokio::test]
async fn test_owner_can_clear_description() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;
    let uri = format!("/collection-points/{}", point.id);

    let (status, body) = app
        .json(
            Method::PUT,
            &uri,
            Some(OWNER),
            Some(json!({"description": "Paper only"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "Paper only");

    let (status, body) = app
        .json(Method::PUT, &uri, Some(OWNER), Some(json!({"description": null})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["description"].is_null());
    assert_eq!(body["name"], "Ecoponto Pinheiros");
}

// --- Reviews ---

#[tokio::test]
async fn test_review_filter_rejects_malformed_parameter() {
    let app = spawn_app().await;
    let (status, body) = app
        .json(Method::GET, "/reviews/filter?user_id=abc", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_review_filter_ignores_empty_parameters() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;
    for reviewer in [OWNER, OTHER] {
        let (status, _) = app
            .json(
                Method::POST,
                "/reviews",
                Some(reviewer),
                Some(json!({"collection_point_id": point.id, "rating": 5})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .json(Method::GET, "/reviews/filter?user_id=&point_id=", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = app
        .json(
            Method::GET,
            &format!("/reviews/filter?user_id={OTHER}&point_id="),
            Some(OWNER),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_review_filter_by_point() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;
    let (status, _) = app
        .json(
            Method::POST,
            "/reviews",
            Some(OTHER),
            Some(json!({"collection_point_id": point.id, "rating": 4})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(
            Method::GET,
            &format!("/reviews/filter?point_id={}&user_id={OTHER}", point.id),
            Some(OWNER),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = app
        .json(Method::GET, "/reviews/filter?point_id=777", Some(OWNER), None)
        .await;
    assert!(body.as_array().unwrap().is_empty());
}

// --- Operating hours ---

#[tokio::test]
async fn test_point_scoped_hours_routes() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/collection-points/{}/operating-hours", point.id),
            Some(OWNER),
            Some(json!({"weekday": 5, "opens_at": "09:00:00", "closes_at": "13:00:00"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["collection_point_id"], point.id);

    let (status, body) = app
        .json(
            Method::GET,
            &format!("/collection-points/{}/operating-hours", point.id),
            Some(OTHER),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = app
        .json(
            Method::POST,
            "/collection-points/9999/operating-hours",
            Some(OWNER),
            Some(json!({"weekday": 5, "opens_at": "09:00:00", "closes_at": "13:00:00"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- Images ---

#[tokio::test]
async fn test_image_upload_links_image_to_point() {
    let app = spawn_app().await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .upload(point.id, OWNER, "image", "bin.PNG", "image/png", &[0x89, b'P', b'N', b'G'])
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let image: PointImage = serde_json::from_value(body).unwrap();
    assert_eq!(image.collection_point_id, point.id);
    assert!(image.image.starts_with(&format!("points/{}/", point.id)));
    assert!(image.image.ends_with(".png"));
    assert_eq!(
        image.url,
        format!("http://localhost:9000/mock-bucket/{}", image.image)
    );

    let stored = app.storage.stored_objects();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content_type, "image/png");
    assert_eq!(stored[0].size, 4);

    // A second upload adds another image rather than replacing the first.
    let (status, _) = app
        .upload(point.id, OTHER, "image", "second.jpg", "image/jpeg", b"jpeg")
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, fetched) = app
        .json(
            Method::GET,
            &format!("/collection-points/{}", point.id),
            Some(OWNER),
            None,
        )
        .await;
    let images = fetched["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["id"], image.id);
}

#[tokio::test]
async fn test_image_upload_to_missing_point_is_not_found() {
    let app = spawn_app().await;
    let (status, body) = app
        .upload(4242, OWNER, "image", "a.png", "image/png", b"png")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(app.storage.stored_objects().is_empty());
}

#[tokio::test]
async fn test_image_upload_rejects_invalid_files() {
    let app = spawn_app_with(
        AppConfig {
            max_upload_bytes: 1024,
            ..AppConfig::default()
        },
        MockStorageService::new(),
    )
    .await;
    let point = app.submit_point(OWNER).await;

    let cases: [(&str, &str, &[u8]); 4] = [
        ("file", "image/png", b"png"),
        ("image", "application/pdf", b"%PDF"),
        ("image", "image/png", b""),
        ("image", "image/png", &[0u8; 2048]),
    ];
    for (field, content_type, bytes) in cases {
        let (status, body) = app
            .upload(point.id, OWNER, field, "upload.png", content_type, bytes)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{field} {content_type}");
        assert!(body["fields"]["image"].is_array());
    }
    assert!(app.storage.stored_objects().is_empty());
}

#[tokio::test]
async fn test_image_upload_storage_failure() {
    let app = spawn_app_with(AppConfig::default(), MockStorageService::new_failing()).await;
    let point = app.submit_point(OWNER).await;

    let (status, body) = app
        .upload(point.id, OWNER, "image", "a.png", "image/png", b"png")
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "storage_error");

    let (_, fetched) = app
        .json(
            Method::GET,
            &format!("/collection-points/{}", point.id),
            Some(OWNER),
            None,
        )
        .await;
    assert!(fetched["images"].as_array().unwrap().is_empty());
}
