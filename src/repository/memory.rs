use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::Repository;
use crate::{
    error::Result,
    models::{
        CollectionPoint, CollectionPointRow, CollectionType, CollectionTypeRequest,
        ModerationChange, NewCollectionPoint, NewOperatingHour, NewPointImage, NewPointReview,
        OperatingHour, PointFilter, PointImage, PointReview, ReviewFilter, UpdatePointRequest,
        UpdateReviewRequest, User,
    },
};

#[derive(Default)]
struct Sequences {
    collection_types: i64,
    points: i64,
    hours: i64,
    reviews: i64,
    images: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

/// Tables
///
/// Rows keyed by id plus the point id -> children indexes that stand in for
/// foreign-key traversal.
#[derive(Default)]
struct Tables {
    seq: Sequences,
    users: BTreeMap<i64, User>,
    collection_types: BTreeMap<i64, CollectionType>,
    points: BTreeMap<i64, CollectionPointRow>,
    hours: BTreeMap<i64, OperatingHour>,
    reviews: BTreeMap<i64, PointReview>,
    images: BTreeMap<i64, PointImage>,
    hours_by_point: HashMap<i64, Vec<i64>>,
    images_by_point: HashMap<i64, Vec<i64>>,
}

impl Tables {
    fn point_hours(&self, point_id: i64) -> Vec<OperatingHour> {
        let mut hours: Vec<OperatingHour> = self
            .hours_by_point
            .get(&point_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.hours.get(id).cloned())
            .collect();
        hours.sort_by_key(|h| (h.weekday, h.opens_at, h.id));
        hours
    }

    // Insertion order.
    fn point_images(&self, point_id: i64) -> Vec<PointImage> {
        self.images_by_point
            .get(&point_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.images.get(id).cloned())
            .collect()
    }

    fn assemble(&self, row: &CollectionPointRow) -> CollectionPoint {
        row.clone()
            .with_children(self.point_hours(row.id), self.point_images(row.id))
    }
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory behind one `RwLock`. Used by
/// the test suite and handy for running the API without Postgres. Users are
/// seeded with `insert_user` since they belong to the identity provider.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    // --- COLLECTION TYPES ---

    async fn list_collection_types(&self) -> Result<Vec<CollectionType>> {
        Ok(self.tables.read().await.collection_types.values().cloned().collect())
    }

    async fn get_collection_type(&self, id: i64) -> Result<Option<CollectionType>> {
        Ok(self.tables.read().await.collection_types.get(&id).cloned())
    }

    async fn create_collection_type(&self, req: CollectionTypeRequest) -> Result<CollectionType> {
        let mut tables = self.tables.write().await;
        let id = next(&mut tables.seq.collection_types);
        let created = CollectionType {
            id,
            name: req.name.trim().to_string(),
            description: req.description,
        };
        tables.collection_types.insert(id, created.clone());
        Ok(created)
    }

    async fn update_collection_type(
        &self,
        id: i64,
        req: CollectionTypeRequest,
    ) -> Result<Option<CollectionType>> {
        let mut tables = self.tables.write().await;
        Ok(tables.collection_types.get_mut(&id).map(|existing| {
            existing.name = req.name.trim().to_string();
            existing.description = req.description;
            existing.clone()
        }))
    }

    async fn delete_collection_type(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.collection_types.remove(&id).is_none() {
            return Ok(false);
        }
        for point in tables.points.values_mut() {
            if point.collection_type_id == Some(id) {
                point.collection_type_id = None;
            }
        }
        Ok(true)
    }

    // --- COLLECTION POINTS ---

    async fn list_points(&self, filter: PointFilter) -> Result<Vec<CollectionPoint>> {
        let tables = self.tables.read().await;
        Ok(tables
            .points
            .values()
            .filter(|point| filter.matches(point))
            .map(|point| tables.assemble(point))
            .collect())
    }

    async fn get_point(&self, id: i64) -> Result<Option<CollectionPoint>> {
        let tables = self.tables.read().await;
        Ok(tables.points.get(&id).map(|point| tables.assemble(point)))
    }

    async fn point_exists(&self, id: i64) -> Result<bool> {
        Ok(self.tables.read().await.points.contains_key(&id))
    }

    async fn create_point(&self, point: NewCollectionPoint) -> Result<CollectionPoint> {
        let mut tables = self.tables.write().await;
        let id = next(&mut tables.seq.points);
        let now = Utc::now();
        let draft = point.draft;
        let row = CollectionPointRow {
            id,
            owner_id: point.owner_id,
            collection_type_id: draft.collection_type_id,
            name: draft.name,
            description: draft.description,
            address: draft.address,
            latitude: draft.latitude,
            longitude: draft.longitude,
            is_active: point.is_active,
            status: point.status,
            created_at: now,
            updated_at: now,
        };
        tables.points.insert(id, row.clone());
        Ok(row.with_children(vec![], vec![]))
    }

    async fn update_point(
        &self,
        id: i64,
        req: UpdatePointRequest,
    ) -> Result<Option<CollectionPoint>> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.points.get_mut(&id) else {
            return Ok(None);
        };
        req.apply_to(row);
        row.updated_at = Utc::now();
        let row = row.clone();
        Ok(Some(tables.assemble(&row)))
    }

    async fn moderate_point(
        &self,
        id: i64,
        change: ModerationChange,
    ) -> Result<Option<CollectionPoint>> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.points.get_mut(&id) else {
            return Ok(None);
        };
        change.apply_to(row);
        row.updated_at = Utc::now();
        let row = row.clone();
        Ok(Some(tables.assemble(&row)))
    }

    async fn delete_point(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.points.remove(&id).is_none() {
            return Ok(false);
        }
        for hour_id in tables.hours_by_point.remove(&id).unwrap_or_default() {
            tables.hours.remove(&hour_id);
        }
        for image_id in tables.images_by_point.remove(&id).unwrap_or_default() {
            tables.images.remove(&image_id);
        }
        tables.reviews.retain(|_, review| review.collection_point_id != id);
        Ok(true)
    }

    // --- OPERATING HOURS ---

    async fn list_operating_hours(&self) -> Result<Vec<OperatingHour>> {
        Ok(self.tables.read().await.hours.values().cloned().collect())
    }

    async fn list_point_operating_hours(&self, point_id: i64) -> Result<Vec<OperatingHour>> {
        Ok(self.tables.read().await.point_hours(point_id))
    }

    async fn create_operating_hour(&self, hour: NewOperatingHour) -> Result<OperatingHour> {
        let mut tables = self.tables.write().await;
        let id = next(&mut tables.seq.hours);
        let created = OperatingHour {
            id,
            collection_point_id: hour.collection_point_id,
            weekday: hour.weekday,
            opens_at: hour.opens_at,
            closes_at: hour.closes_at,
        };
        tables.hours.insert(id, created.clone());
        tables
            .hours_by_point
            .entry(hour.collection_point_id)
            .or_default()
            .push(id);
        Ok(created)
    }

    // --- REVIEWS ---

    async fn list_reviews(&self, filter: ReviewFilter) -> Result<Vec<PointReview>> {
        Ok(self
            .tables
            .read()
            .await
            .reviews
            .values()
            .filter(|review| filter.matches(review))
            .cloned()
            .collect())
    }

    async fn get_review(&self, id: i64) -> Result<Option<PointReview>> {
        Ok(self.tables.read().await.reviews.get(&id).cloned())
    }

    async fn create_review(&self, review: NewPointReview) -> Result<PointReview> {
        let mut tables = self.tables.write().await;
        let id = next(&mut tables.seq.reviews);
        let created = PointReview {
            id,
            user_id: review.user_id,
            collection_point_id: review.collection_point_id,
            rating: review.rating,
            comment: review.comment,
            created_at: Utc::now(),
        };
        tables.reviews.insert(id, created.clone());
        Ok(created)
    }

    async fn update_review(
        &self,
        id: i64,
        req: UpdateReviewRequest,
    ) -> Result<Option<PointReview>> {
        let mut tables = self.tables.write().await;
        Ok(tables.reviews.get_mut(&id).map(|review| {
            if let Some(rating) = req.rating {
                review.rating = rating;
            }
            if let Some(comment) = req.comment {
                review.comment = Some(comment);
            }
            review.clone()
        }))
    }

    async fn delete_review(&self, id: i64) -> Result<bool> {
        Ok(self.tables.write().await.reviews.remove(&id).is_some())
    }

    // --- IMAGES ---

    async fn create_point_image(&self, image: NewPointImage) -> Result<PointImage> {
        let mut tables = self.tables.write().await;
        let id = next(&mut tables.seq.images);
        let created = PointImage {
            id,
            collection_point_id: image.collection_point_id,
            image: image.image,
            url: image.url,
            uploaded_at: Utc::now(),
        };
        tables.images.insert(id, created.clone());
        tables
            .images_by_point
            .entry(image.collection_point_id)
            .or_default()
            .push(id);
        Ok(created)
    }
}
