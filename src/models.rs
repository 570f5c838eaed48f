use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::AppError;

// --- Identity ---

/// User
///
/// The identity record resolved during authentication. Users are managed by the
/// identity provider; this service only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub email: String,
    // Administrator flag. Staff users may moderate points.
    pub is_staff: bool,
}

// --- Moderation state ---

/// PointStatus
///
/// Moderation outcome of a collection point. Serialized as the literals
/// `pending`, `approved` and `rejected`, both in JSON and in the `point_status`
/// Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS, ToSchema,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "point_status", rename_all = "lowercase")]
#[ts(export)]
pub enum PointStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl PointStatus {
    pub const ALL: [PointStatus; 3] = [
        PointStatus::Pending,
        PointStatus::Approved,
        PointStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PointStatus::Pending => "pending",
            PointStatus::Approved => "approved",
            PointStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPointStatus(pub String);

impl fmt::Display for UnknownPointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" is not a valid choice; expected one of pending, approved, rejected",
            self.0
        )
    }
}

impl FromStr for PointStatus {
    type Err = UnknownPointStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PointStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownPointStatus(s.to_string()))
    }
}

/// Visibility filters understood by `Repository::list_points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFilter {
    All,
    OwnedBy(i64),
    Active,
    /// `is_active = false AND status = pending`: the admin review queue.
    AwaitingModeration,
}

impl PointFilter {
    pub fn matches(&self, point: &CollectionPointRow) -> bool {
        match *self {
            PointFilter::All => true,
            PointFilter::OwnedBy(owner_id) => point.owner_id == owner_id,
            PointFilter::Active => point.is_active,
            PointFilter::AwaitingModeration => point.awaiting_moderation(),
        }
    }
}

// --- Collection types ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct CollectionType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Body of `POST /collection-types` and `PUT /collection-types/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate, Default)]
pub struct CollectionTypeRequest {
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub name: String,
    pub description: Option<String>,
}

impl CollectionTypeRequest {
    pub fn trimmed(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self
    }
}

// --- Collection points ---

/// CollectionPointRow
///
/// A stored collection point without its child collections, as read from the
/// `collection_points` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct CollectionPointRow {
    pub id: i64,
    pub owner_id: i64,
    pub collection_type_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub status: PointStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionPointRow {
    pub fn awaiting_moderation(&self) -> bool {
        !self.is_active && self.status == PointStatus::Pending
    }

    pub fn with_children(
        self,
        operating_hours: Vec<OperatingHour>,
        images: Vec<PointImage>,
    ) -> CollectionPoint {
        CollectionPoint {
            id: self.id,
            owner_id: self.owner_id,
            collection_type_id: self.collection_type_id,
            name: self.name,
            description: self.description,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            is_active: self.is_active,
            status: self.status,
            operating_hours,
            images,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// CollectionPoint
///
/// Full representation of a collection point returned by every point endpoint,
/// including its operating hours and images.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct CollectionPoint {
    pub id: i64,
    // Submitting user. Fixed at creation.
    pub owner_id: i64,
    pub collection_type_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub status: PointStatus,
    pub operating_hours: Vec<OperatingHour>,
    pub images: Vec<PointImage>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// CreatePointRequest
///
/// Client-supplied part of a new collection point. Only descriptive fields are
/// read; `is_active`, `status` and `owner_id` keys in the body are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreatePointRequest {
    #[validate(length(min = 1, max = 200, message = "must be between 1 and 200 characters"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub address: String,
    #[validate(range(min = -90.0, max = 90.0, message = "must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "must be between -180 and 180"))]
    pub longitude: f64,
    #[serde(default)]
    pub collection_type_id: Option<i64>,
}

/// PointDraft
///
/// Descriptive fields that passed validation. Produced only by
/// `CreatePointRequest::into_draft`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDraft {
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub collection_type_id: Option<i64>,
}

impl CreatePointRequest {
    /// Trims the text fields, then validates, so whitespace-only values count as empty.
    pub fn into_draft(mut self) -> Result<PointDraft, AppError> {
        self.name = self.name.trim().to_string();
        self.address = self.address.trim().to_string();
        self.validate()?;
        Ok(PointDraft {
            name: self.name,
            description: self.description,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            collection_type_id: self.collection_type_id,
        })
    }
}

/// NewCollectionPoint
///
/// A draft merged with the server-authoritative fields, ready for persistence.
/// Every submission starts inactive and pending.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCollectionPoint {
    pub owner_id: i64,
    pub draft: PointDraft,
    pub is_active: bool,
    pub status: PointStatus,
}

impl NewCollectionPoint {
    pub fn submitted_by(owner_id: i64, draft: PointDraft) -> Self {
        Self {
            owner_id,
            draft,
            is_active: false,
            status: PointStatus::Pending,
        }
    }
}

/// UpdatePointRequest
///
/// Partial update of descriptive fields by the owner. Moderation fields are not
/// part of this payload and therefore cannot be changed through it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdatePointRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 200, message = "must be between 1 and 200 characters"))]
    pub name: Option<String>,

    /// `null` clears the description; an absent key leaves it unchanged.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -90.0, max = 90.0, message = "must be between -90 and 90"))]
    pub latitude: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -180.0, max = 180.0, message = "must be between -180 and 180"))]
    pub longitude: Option<f64>,

    /// `null` detaches the point from its collection type.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<i64>)]
    pub collection_type_id: Option<Option<i64>>,
}

impl UpdatePointRequest {
    /// Trims the text fields so validation sees what will be stored.
    pub fn trimmed(mut self) -> Self {
        self.name = self.name.map(|name| name.trim().to_string());
        self.address = self.address.map(|address| address.trim().to_string());
        self
    }

    pub fn apply_to(&self, point: &mut CollectionPointRow) {
        if let Some(name) = &self.name {
            point.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            point.description = description.clone();
        }
        if let Some(address) = &self.address {
            point.address = address.trim().to_string();
        }
        if let Some(latitude) = self.latitude {
            point.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            point.longitude = longitude;
        }
        if let Some(type_id) = self.collection_type_id {
            point.collection_type_id = type_id;
        }
    }
}

/// Keeps an explicit `null` apart from a missing key: missing is `None`,
/// `null` is `Some(None)`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

/// PointStatusUpdateRequest
///
/// Body of the moderation endpoint. `status` is kept as raw text so an unknown
/// literal is reported as a field error rather than a generic body error.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PointStatusUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "approved")]
    pub status: Option<String>,
}

/// ModerationChange
///
/// A validated moderation update. Fields left `None` are not touched; the two
/// fields are applied independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModerationChange {
    pub is_active: Option<bool>,
    pub status: Option<PointStatus>,
}

impl ModerationChange {
    pub fn apply_to(&self, point: &mut CollectionPointRow) {
        if let Some(is_active) = self.is_active {
            point.is_active = is_active;
        }
        if let Some(status) = self.status {
            point.status = status;
        }
    }
}

impl TryFrom<PointStatusUpdateRequest> for ModerationChange {
    type Error = AppError;

    fn try_from(req: PointStatusUpdateRequest) -> Result<Self, Self::Error> {
        let status = match req.status {
            Some(raw) => Some(
                raw.parse::<PointStatus>()
                    .map_err(|e| AppError::invalid_field("status", e.to_string()))?,
            ),
            None => None,
        };
        Ok(ModerationChange {
            is_active: req.is_active,
            status,
        })
    }
}

// --- Operating hours ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct OperatingHour {
    pub id: i64,
    pub collection_point_id: i64,
    // 0 = Monday ..= 6 = Sunday.
    pub weekday: i16,
    #[ts(type = "string")]
    #[schema(value_type = String, example = "08:00:00")]
    pub opens_at: NaiveTime,
    #[ts(type = "string")]
    #[schema(value_type = String, example = "17:30:00")]
    pub closes_at: NaiveTime,
}

/// OperatingHourRequest
///
/// Body for creating an operating hour. `collection_point_id` is required on the
/// global route and ignored on the point-scoped route.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct OperatingHourRequest {
    #[serde(default)]
    pub collection_point_id: Option<i64>,
    #[validate(range(min = 0, max = 6, message = "must be between 0 (Monday) and 6 (Sunday)"))]
    pub weekday: i16,
    #[ts(type = "string")]
    #[schema(value_type = String, example = "08:00:00")]
    pub opens_at: NaiveTime,
    #[ts(type = "string")]
    #[schema(value_type = String, example = "17:30:00")]
    pub closes_at: NaiveTime,
}

/// An operating hour bound to its parent point, ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperatingHour {
    pub collection_point_id: i64,
    pub weekday: i16,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
}

impl OperatingHourRequest {
    /// Validates the request and binds it to `point_id`, discarding any
    /// `collection_point_id` present in the body.
    pub fn bind_to(self, point_id: i64) -> Result<NewOperatingHour, AppError> {
        self.validate()?;
        if self.opens_at >= self.closes_at {
            return Err(AppError::invalid_field(
                "closes_at",
                "must be later than opens_at",
            ));
        }
        Ok(NewOperatingHour {
            collection_point_id: point_id,
            weekday: self.weekday,
            opens_at: self.opens_at,
            closes_at: self.closes_at,
        })
    }
}

// --- Reviews ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct PointReview {
    pub id: i64,
    // Reviewer.
    pub user_id: i64,
    pub collection_point_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct CreateReviewRequest {
    pub collection_point_id: i64,
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rating: i16,
    #[serde(default)]
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rating: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPointReview {
    pub user_id: i64,
    pub collection_point_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
}

/// ReviewFilter
///
/// Optional conjunctive filter over reviews. An absent or empty parameter
/// (`?user_id=`) is not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, utoipa::IntoParams)]
pub struct ReviewFilter {
    /// Reviewer id.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub user_id: Option<i64>,
    /// Collection point id.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub point_id: Option<i64>,
}

/// Query-string helper: `""` => `None`, otherwise the value must parse as an id.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid id {value:?}: {e}"))),
    }
}

impl ReviewFilter {
    pub fn matches(&self, review: &PointReview) -> bool {
        self.user_id.is_none_or(|id| review.user_id == id)
            && self.point_id.is_none_or(|id| review.collection_point_id == id)
    }
}

// --- Images ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct PointImage {
    pub id: i64,
    pub collection_point_id: i64,
    // Object key inside the media bucket.
    pub image: String,
    // Resolved public location of the stored object.
    pub url: String,
    #[ts(type = "string")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPointImage {
    pub collection_point_id: i64,
    pub image: String,
    pub url: String,
}

/// PointImageUploadForm
///
/// Multipart form accepted by the image upload endpoint. Documentation only; the
/// handler reads the body with axum's `Multipart` extractor.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct PointImageUploadForm {
    /// The image file.
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub image: String,
}
