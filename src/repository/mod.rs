use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::Result,
    models::{
        CollectionPoint, CollectionType, CollectionTypeRequest, ModerationChange,
        NewCollectionPoint, NewOperatingHour, NewPointImage, NewPointReview, OperatingHour,
        PointFilter, PointImage, PointReview, ReviewFilter, UpdatePointRequest,
        UpdateReviewRequest, User,
    },
};

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// Repository Trait
///
/// The persistence contract used by the handlers. Two implementations exist:
/// `PostgresRepository` for the running service and `InMemoryRepository` for
/// tests and local experiments.
///
/// Lookups return `Ok(None)` / `Ok(false)` for a missing row; the handler decides
/// whether that becomes a 404 or a validation error. Parent-existence checks and
/// child inserts are separate calls and are not atomic with each other.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identity ---
    async fn get_user(&self, id: i64) -> Result<Option<User>>;

    // --- Collection types ---
    async fn list_collection_types(&self) -> Result<Vec<CollectionType>>;
    async fn get_collection_type(&self, id: i64) -> Result<Option<CollectionType>>;
    async fn create_collection_type(&self, req: CollectionTypeRequest) -> Result<CollectionType>;
    async fn update_collection_type(
        &self,
        id: i64,
        req: CollectionTypeRequest,
    ) -> Result<Option<CollectionType>>;
    /// Deleting a type detaches it from every point referencing it.
    async fn delete_collection_type(&self, id: i64) -> Result<bool>;

    // --- Collection points ---
    async fn list_points(&self, filter: PointFilter) -> Result<Vec<CollectionPoint>>;
    async fn get_point(&self, id: i64) -> Result<Option<CollectionPoint>>;
    async fn point_exists(&self, id: i64) -> Result<bool>;
    async fn create_point(&self, point: NewCollectionPoint) -> Result<CollectionPoint>;
    // Descriptive fields only. Never touches is_active/status/owner_id.
    async fn update_point(
        &self,
        id: i64,
        req: UpdatePointRequest,
    ) -> Result<Option<CollectionPoint>>;
    // The only write path for is_active/status after creation.
    async fn moderate_point(
        &self,
        id: i64,
        change: ModerationChange,
    ) -> Result<Option<CollectionPoint>>;
    /// Removes the point together with its hours, images and reviews.
    async fn delete_point(&self, id: i64) -> Result<bool>;

    // --- Operating hours ---
    async fn list_operating_hours(&self) -> Result<Vec<OperatingHour>>;
    async fn list_point_operating_hours(&self, point_id: i64) -> Result<Vec<OperatingHour>>;
    async fn create_operating_hour(&self, hour: NewOperatingHour) -> Result<OperatingHour>;

    // --- Reviews ---
    async fn list_reviews(&self, filter: ReviewFilter) -> Result<Vec<PointReview>>;
    async fn get_review(&self, id: i64) -> Result<Option<PointReview>>;
    async fn create_review(&self, review: NewPointReview) -> Result<PointReview>;
    async fn update_review(
        &self,
        id: i64,
        req: UpdateReviewRequest,
    ) -> Result<Option<PointReview>>;
    async fn delete_review(&self, id: i64) -> Result<bool>;

    // --- Images ---
    async fn create_point_image(&self, image: NewPointImage) -> Result<PointImage>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer stored in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;
