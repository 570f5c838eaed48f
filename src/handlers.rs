use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiJson, AppError, ErrorBody, Result},
    models::{
        CollectionPoint, CollectionType, CollectionTypeRequest, CreatePointRequest,
        CreateReviewRequest, ModerationChange, NewCollectionPoint, NewPointImage, NewPointReview,
        OperatingHour, OperatingHourRequest, PointFilter, PointImage, PointImageUploadForm,
        PointReview, PointStatusUpdateRequest, ReviewFilter, UpdatePointRequest,
        UpdateReviewRequest,
    },
};
use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State, multipart::MultipartRejection,
        rejection::QueryRejection,
    },
    http::StatusCode,
};
use uuid::Uuid;
use validator::Validate;

// --- Shared checks ---

async fn ensure_collection_type(state: &AppState, type_id: Option<i64>) -> Result<()> {
    if let Some(type_id) = type_id {
        if state.repo.get_collection_type(type_id).await?.is_none() {
            return Err(AppError::invalid_field(
                "collection_type_id",
                format!("collection type {type_id} does not exist"),
            ));
        }
    }
    Ok(())
}

/// Loads a point and checks that `user` may edit it (owner or staff).
async fn editable_point(state: &AppState, user: &AuthUser, id: i64) -> Result<CollectionPoint> {
    let point = state
        .repo
        .get_point(id)
        .await?
        .ok_or_else(|| AppError::point_not_found(id))?;
    if !user.may_edit(point.owner_id) {
        return Err(AppError::Forbidden(
            "only the owner or an administrator may modify this collection point".to_string(),
        ));
    }
    Ok(point)
}

async fn editable_review(state: &AppState, user: &AuthUser, id: i64) -> Result<PointReview> {
    let review = state
        .repo
        .get_review(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("review {id} does not exist")))?;
    if !user.may_edit(review.user_id) {
        return Err(AppError::Forbidden(
            "only the reviewer or an administrator may modify this review".to_string(),
        ));
    }
    Ok(review)
}

// --- Collection types ---

#[utoipa::path(
    get,
    path = "/collection-types",
    tag = "collection-types",
    responses((status = 200, description = "All collection types", body = [CollectionType]))
)]
pub async fn list_collection_types(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionType>>> {
    Ok(Json(state.repo.list_collection_types().await?))
}

#[utoipa::path(
    post,
    path = "/collection-types",
    tag = "collection-types",
    request_body = CollectionTypeRequest,
    responses(
        (status = 201, description = "Created", body = CollectionType),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_collection_type(
    _user: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CollectionTypeRequest>,
) -> Result<(StatusCode, Json<CollectionType>)> {
    let payload = payload.trimmed();
    payload.validate()?;
    let created = state.repo.create_collection_type(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/collection-types/{id}",
    tag = "collection-types",
    params(("id" = i64, Path, description = "Collection type ID")),
    responses(
        (status = 200, description = "Found", body = CollectionType),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_collection_type(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CollectionType>> {
    state
        .repo
        .get_collection_type(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("collection type {id} does not exist")))
}

#[utoipa::path(
    put,
    path = "/collection-types/{id}",
    tag = "collection-types",
    params(("id" = i64, Path, description = "Collection type ID")),
    request_body = CollectionTypeRequest,
    responses(
        (status = 200, description = "Updated", body = CollectionType),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn update_collection_type(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<CollectionTypeRequest>,
) -> Result<Json<CollectionType>> {
    let payload = payload.trimmed();
    payload.validate()?;
    state
        .repo
        .update_collection_type(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("collection type {id} does not exist")))
}

#[utoipa::path(
    delete,
    path = "/collection-types/{id}",
    tag = "collection-types",
    params(("id" = i64, Path, description = "Collection type ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn delete_collection_type(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    if state.repo.delete_collection_type(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("collection type {id} does not exist")))
    }
}

// --- Collection points ---

/// list_points
///
/// Every point regardless of moderation state.
#[utoipa::path(
    get,
    path = "/collection-points",
    tag = "collection-points",
    responses((status = 200, description = "All collection points", body = [CollectionPoint]))
)]
pub async fn list_points(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionPoint>>> {
    Ok(Json(state.repo.list_points(PointFilter::All).await?))
}

/// list_my_points
///
/// Points submitted by the caller, including pending and inactive ones.
#[utoipa::path(
    get,
    path = "/collection-points/mine",
    tag = "collection-points",
    responses((status = 200, description = "Caller's submitted points", body = [CollectionPoint]))
)]
pub async fn list_my_points(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionPoint>>> {
    Ok(Json(state.repo.list_points(PointFilter::OwnedBy(id)).await?))
}

#[utoipa::path(
    get,
    path = "/collection-points/active",
    tag = "collection-points",
    responses((status = 200, description = "Points with is_active = true", body = [CollectionPoint]))
)]
pub async fn list_active_points(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionPoint>>> {
    Ok(Json(state.repo.list_points(PointFilter::Active).await?))
}

/// list_inactive_points
///
/// The moderation queue: inactive points whose status is still `pending`.
#[utoipa::path(
    get,
    path = "/collection-points/inactive",
    tag = "collection-points",
    responses((status = 200, description = "Points awaiting moderation", body = [CollectionPoint]))
)]
pub async fn list_inactive_points(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionPoint>>> {
    Ok(Json(state.repo.list_points(PointFilter::AwaitingModeration).await?))
}

/// create_point
///
/// Validates the descriptive fields into a draft, then merges the caller's id as
/// owner and the initial moderation state. Client-sent `is_active`/`status` are
/// never read.
#[utoipa::path(
    post,
    path = "/collection-points",
    tag = "collection-points",
    request_body = CreatePointRequest,
    responses(
        (status = 201, description = "Created, awaiting moderation", body = CollectionPoint),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_point(
    AuthUser { id: owner_id, .. }: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreatePointRequest>,
) -> Result<(StatusCode, Json<CollectionPoint>)> {
    let draft = payload.into_draft()?;
    ensure_collection_type(&state, draft.collection_type_id).await?;

    let point = state
        .repo
        .create_point(NewCollectionPoint::submitted_by(owner_id, draft))
        .await?;
    tracing::info!(point_id = point.id, owner_id, "collection point submitted");
    Ok((StatusCode::CREATED, Json(point)))
}

#[utoipa::path(
    get,
    path = "/collection-points/{id}",
    tag = "collection-points",
    params(("id" = i64, Path, description = "Collection point ID")),
    responses(
        (status = 200, description = "Found", body = CollectionPoint),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_point(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CollectionPoint>> {
    state
        .repo
        .get_point(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::point_not_found(id))
}

/// update_point
///
/// Owner (or staff) edit of descriptive fields. `UpdatePointRequest` has no
/// moderation fields, so this path cannot change `is_active`/`status`.
#[utoipa::path(
    put,
    path = "/collection-points/{id}",
    tag = "collection-points",
    params(("id" = i64, Path, description = "Collection point ID")),
    request_body = UpdatePointRequest,
    responses(
        (status = 200, description = "Updated", body = CollectionPoint),
        (status = 403, description = "Not owner", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn update_point(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<UpdatePointRequest>,
) -> Result<Json<CollectionPoint>> {
    let payload = payload.trimmed();
    payload.validate()?;
    editable_point(&state, &user, id).await?;
    ensure_collection_type(&state, payload.collection_type_id.flatten()).await?;

    state
        .repo
        .update_point(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::point_not_found(id))
}

#[utoipa::path(
    delete,
    path = "/collection-points/{id}",
    tag = "collection-points",
    params(("id" = i64, Path, description = "Collection point ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not owner", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn delete_point(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    editable_point(&state, &user, id).await?;
    if state.repo.delete_point(id).await? {
        tracing::info!(point_id = id, user_id = user.id, "collection point deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::point_not_found(id))
    }
}

/// update_point_status
///
/// [Admin] The moderation endpoint. The staff check runs before the point is
/// looked up, so a non-admin learns nothing about which ids exist. Only the
/// provided fields change; `status` and `is_active` are not derived from each
/// other.
#[utoipa::path(
    patch,
    path = "/collection-points/{id}/status",
    tag = "moderation",
    params(("id" = i64, Path, description = "Collection point ID")),
    request_body = PointStatusUpdateRequest,
    responses(
        (status = 200, description = "Moderated", body = CollectionPoint),
        (status = 400, description = "Unknown status", body = ErrorBody),
        (status = 403, description = "Not an administrator", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn update_point_status(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<ApiJson<PointStatusUpdateRequest>>,
) -> Result<Json<CollectionPoint>> {
    user.require_staff()?;
    let ApiJson(payload) = payload?;
    let change = ModerationChange::try_from(payload)?;

    let point = state
        .repo
        .moderate_point(id, change)
        .await?
        .ok_or_else(|| AppError::point_not_found(id))?;

    tracing::info!(
        point_id = point.id,
        admin_id = user.id,
        is_active = point.is_active,
        status = %point.status,
        "collection point moderated"
    );
    Ok(Json(point))
}

// --- Operating hours ---

#[utoipa::path(
    get,
    path = "/operating-hours",
    tag = "operating-hours",
    responses((status = 200, description = "All operating hours", body = [OperatingHour]))
)]
pub async fn list_operating_hours(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<OperatingHour>>> {
    Ok(Json(state.repo.list_operating_hours().await?))
}

/// create_operating_hour
///
/// Global creation: the parent comes from `collection_point_id` in the body and
/// must reference an existing point.
#[utoipa::path(
    post,
    path = "/operating-hours",
    tag = "operating-hours",
    request_body = OperatingHourRequest,
    responses(
        (status = 201, description = "Created", body = OperatingHour),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_operating_hour(
    _user: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<OperatingHourRequest>,
) -> Result<(StatusCode, Json<OperatingHour>)> {
    let point_id = payload
        .collection_point_id
        .ok_or_else(|| AppError::invalid_field("collection_point_id", "this field is required"))?;
    if !state.repo.point_exists(point_id).await? {
        return Err(AppError::invalid_field(
            "collection_point_id",
            format!("collection point {point_id} does not exist"),
        ));
    }

    let hour = payload.bind_to(point_id)?;
    let created = state.repo.create_operating_hour(hour).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// list_point_operating_hours
///
/// Hours of one point. An id with no hours yields an empty list, never a 404.
#[utoipa::path(
    get,
    path = "/collection-points/{id}/operating-hours",
    tag = "operating-hours",
    params(("id" = i64, Path, description = "Collection point ID")),
    responses((status = 200, description = "Hours of the point", body = [OperatingHour]))
)]
pub async fn list_point_operating_hours(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
) -> Result<Json<Vec<OperatingHour>>> {
    Ok(Json(scoped_operating_hours(&state, Some(point_id)).await?))
}

/// Hours filtered by a parent point id; no parent id means no hours.
pub async fn scoped_operating_hours(
    state: &AppState,
    point_id: Option<i64>,
) -> Result<Vec<OperatingHour>> {
    match point_id {
        Some(point_id) => state.repo.list_point_operating_hours(point_id).await,
        None => Ok(vec![]),
    }
}

/// create_point_operating_hour
///
/// Scoped creation: the parent is the path id, which must exist. Any
/// `collection_point_id` in the body is ignored.
#[utoipa::path(
    post,
    path = "/collection-points/{id}/operating-hours",
    tag = "operating-hours",
    params(("id" = i64, Path, description = "Collection point ID")),
    request_body = OperatingHourRequest,
    responses(
        (status = 201, description = "Created", body = OperatingHour),
        (status = 404, description = "Point Not Found", body = ErrorBody)
    )
)]
pub async fn create_point_operating_hour(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
    ApiJson(payload): ApiJson<OperatingHourRequest>,
) -> Result<(StatusCode, Json<OperatingHour>)> {
    if !state.repo.point_exists(point_id).await? {
        return Err(AppError::point_not_found(point_id));
    }

    if let Some(body_point_id) = payload.collection_point_id.filter(|id| *id != point_id) {
        tracing::debug!(point_id, body_point_id, "ignoring collection_point_id from body");
    }
    let hour = payload.bind_to(point_id)?;
    let created = state.repo.create_operating_hour(hour).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// --- Reviews ---

#[utoipa::path(
    get,
    path = "/reviews",
    tag = "reviews",
    responses((status = 200, description = "All reviews", body = [PointReview]))
)]
pub async fn list_reviews(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<PointReview>>> {
    Ok(Json(state.repo.list_reviews(ReviewFilter::default()).await?))
}

/// create_review
///
/// The reviewer is always the caller. Several reviews of the same point by the
/// same user are allowed.
#[utoipa::path(
    post,
    path = "/reviews",
    tag = "reviews",
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Created", body = PointReview),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_review(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateReviewRequest>,
) -> Result<(StatusCode, Json<PointReview>)> {
    payload.validate()?;
    let point_id = payload.collection_point_id;
    if !state.repo.point_exists(point_id).await? {
        return Err(AppError::invalid_field(
            "collection_point_id",
            format!("collection point {point_id} does not exist"),
        ));
    }

    let review = state
        .repo
        .create_review(NewPointReview {
            user_id,
            collection_point_id: point_id,
            rating: payload.rating,
            comment: payload.comment,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

#[utoipa::path(
    get,
    path = "/reviews/{id}",
    tag = "reviews",
    params(("id" = i64, Path, description = "Review ID")),
    responses(
        (status = 200, description = "Found", body = PointReview),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_review(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PointReview>> {
    state
        .repo
        .get_review(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("review {id} does not exist")))
}

#[utoipa::path(
    put,
    path = "/reviews/{id}",
    tag = "reviews",
    params(("id" = i64, Path, description = "Review ID")),
    request_body = UpdateReviewRequest,
    responses(
        (status = 200, description = "Updated", body = PointReview),
        (status = 403, description = "Not the reviewer", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn update_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<UpdateReviewRequest>,
) -> Result<Json<PointReview>> {
    payload.validate()?;
    editable_review(&state, &user, id).await?;
    state
        .repo
        .update_review(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("review {id} does not exist")))
}

#[utoipa::path(
    delete,
    path = "/reviews/{id}",
    tag = "reviews",
    params(("id" = i64, Path, description = "Review ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the reviewer", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn delete_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    editable_review(&state, &user, id).await?;
    if state.repo.delete_review(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("review {id} does not exist")))
    }
}

/// filter_reviews
///
/// Reviews narrowed by `user_id` and/or `point_id`. Absent parameters are not
/// applied. Always 200, possibly with an empty list.
#[utoipa::path(
    get,
    path = "/reviews/filter",
    tag = "reviews",
    params(ReviewFilter),
    responses(
        (status = 200, description = "Matching reviews", body = [PointReview]),
        (status = 400, description = "Malformed parameter", body = ErrorBody)
    )
)]
pub async fn filter_reviews(
    _user: AuthUser,
    State(state): State<AppState>,
    filter: std::result::Result<Query<ReviewFilter>, QueryRejection>,
) -> Result<Json<Vec<PointReview>>> {
    let Query(filter) = filter.map_err(|e| AppError::validation(e.body_text()))?;
    Ok(Json(state.repo.list_reviews(filter).await?))
}

// --- Images ---

/// upload_point_image
///
/// Reads the `image` field of a multipart body, stores it and links a new
/// `PointImage` to the point. Every call creates a new image.
#[utoipa::path(
    post,
    path = "/collection-points/{id}/images",
    tag = "images",
    params(("id" = i64, Path, description = "Collection point ID")),
    request_body(content = PointImageUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Uploaded", body = PointImage),
        (status = 400, description = "Missing or invalid image", body = ErrorBody),
        (status = 404, description = "Point Not Found", body = ErrorBody)
    )
)]
pub async fn upload_point_image(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(point_id): Path<i64>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<PointImage>)> {
    if !state.repo.point_exists(point_id).await? {
        return Err(AppError::point_not_found(point_id));
    }
    let mut multipart =
        multipart.map_err(|e| AppError::invalid_field("image", e.body_text()))?;

    let upload = read_image_field(&mut multipart, state.config.max_upload_bytes).await?;

    let key = format!(
        "points/{}/{}.{}",
        point_id,
        Uuid::new_v4(),
        upload.extension()
    );
    let url = state
        .storage
        .put_object(&key, upload.bytes, &upload.content_type)
        .await?;

    let image = state
        .repo
        .create_point_image(NewPointImage {
            collection_point_id: point_id,
            image: key,
            url,
        })
        .await?;
    tracing::info!(point_id, image_id = image.id, "point image uploaded");
    Ok((StatusCode::CREATED, Json(image)))
}

struct ImageUpload {
    file_name: Option<String>,
    content_type: String,
    bytes: Vec<u8>,
}

impl ImageUpload {
    fn extension(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(std::ffi::OsStr::to_str)
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| {
                self.content_type
                    .trim_start_matches("image/")
                    .split(['+', ';'])
                    .next()
                    .unwrap_or("bin")
                    .to_string()
            })
    }
}

/// Pulls the `image` field out of the form, ignoring other fields.
async fn read_image_field(multipart: &mut Multipart, max_bytes: usize) -> Result<ImageUpload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::invalid_field("image", e.body_text()))?
    {
        if field.name() != Some("image") {
            tracing::debug!("ignoring multipart field {:?}", field.name());
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| AppError::invalid_field("image", "the uploaded file has no content type"))?;
        if !content_type.starts_with("image/") {
            return Err(AppError::invalid_field(
                "image",
                format!("expected an image, got {content_type}"),
            ));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::invalid_field("image", e.body_text()))?;
        if bytes.is_empty() {
            return Err(AppError::invalid_field("image", "the submitted file is empty"));
        }
        if bytes.len() > max_bytes {
            return Err(AppError::invalid_field(
                "image",
                format!("file exceeds the {max_bytes} byte limit"),
            ));
        }

        return Ok(ImageUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(AppError::invalid_field("image", "no file was submitted"))
}
