use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};

use super::Repository;
use crate::{
    error::Result,
    models::{
        CollectionPoint, CollectionPointRow, CollectionType, CollectionTypeRequest,
        ModerationChange, NewCollectionPoint, NewOperatingHour, NewPointImage, NewPointReview,
        OperatingHour, PointFilter, PointImage, PointReview, PointStatus, ReviewFilter,
        UpdatePointRequest, UpdateReviewRequest, User,
    },
};

const POINT_COLUMNS: &str = "id, owner_id, collection_type_id, name, description, address, \
     latitude, longitude, is_active, status, created_at, updated_at";

const HOUR_COLUMNS: &str = "id, collection_point_id, weekday, opens_at, closes_at";

const REVIEW_COLUMNS: &str = "id, user_id, collection_point_id, rating, comment, created_at";

const IMAGE_COLUMNS: &str = "id, collection_point_id, image, url, uploaded_at";

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. Queries are built at
/// runtime with bound parameters; the schema lives in `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads hours and images for `rows` with one query per child table and
    /// stitches them onto their parents, preserving the order of `rows`.
    async fn attach_children(&self, rows: Vec<CollectionPointRow>) -> Result<Vec<CollectionPoint>> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<i64> = rows.iter().map(|p| p.id).collect();

        let hours_sql = format!(
            "SELECT {HOUR_COLUMNS} FROM operating_hours \
             WHERE collection_point_id = ANY($1) ORDER BY weekday, opens_at, id"
        );
        let hours = sqlx::query_as::<_, OperatingHour>(&hours_sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        let images_sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM point_images \
             WHERE collection_point_id = ANY($1) ORDER BY id"
        );
        let images = sqlx::query_as::<_, PointImage>(&images_sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        let mut hours_by_point: HashMap<i64, Vec<OperatingHour>> = HashMap::new();
        for hour in hours {
            hours_by_point.entry(hour.collection_point_id).or_default().push(hour);
        }
        let mut images_by_point: HashMap<i64, Vec<PointImage>> = HashMap::new();
        for image in images {
            images_by_point.entry(image.collection_point_id).or_default().push(image);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let hours = hours_by_point.remove(&row.id).unwrap_or_default();
                let images = images_by_point.remove(&row.id).unwrap_or_default();
                row.with_children(hours, images)
            })
            .collect())
    }

    async fn attach_one(&self, row: Option<CollectionPointRow>) -> Result<Option<CollectionPoint>> {
        match row {
            Some(row) => Ok(self.attach_children(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, email, is_staff FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    // --- COLLECTION TYPES ---

    async fn list_collection_types(&self) -> Result<Vec<CollectionType>> {
        let types = sqlx::query_as::<_, CollectionType>(
            "SELECT id, name, description FROM collection_types ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(types)
    }

    async fn get_collection_type(&self, id: i64) -> Result<Option<CollectionType>> {
        let found = sqlx::query_as::<_, CollectionType>(
            "SELECT id, name, description FROM collection_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found)
    }

    async fn create_collection_type(&self, req: CollectionTypeRequest) -> Result<CollectionType> {
        let created = sqlx::query_as::<_, CollectionType>(
            "INSERT INTO collection_types (name, description) VALUES ($1, $2) \
             RETURNING id, name, description",
        )
        .bind(req.name.trim())
        .bind(req.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_collection_type(
        &self,
        id: i64,
        req: CollectionTypeRequest,
    ) -> Result<Option<CollectionType>> {
        let updated = sqlx::query_as::<_, CollectionType>(
            "UPDATE collection_types SET name = $2, description = $3 WHERE id = $1 \
             RETURNING id, name, description",
        )
        .bind(id)
        .bind(req.name.trim())
        .bind(req.description)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_collection_type(&self, id: i64) -> Result<bool> {
        // ON DELETE SET NULL detaches referencing points.
        let res = sqlx::query("DELETE FROM collection_types WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- COLLECTION POINTS ---

    /// list_points
    ///
    /// Translates a `PointFilter` into a WHERE clause with QueryBuilder. The
    /// awaiting-moderation queue is `is_active = false AND status = 'pending'`.
    async fn list_points(&self, filter: PointFilter) -> Result<Vec<CollectionPoint>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {POINT_COLUMNS} FROM collection_points"));

        match filter {
            PointFilter::All => {}
            PointFilter::OwnedBy(owner_id) => {
                builder.push(" WHERE owner_id = ");
                builder.push_bind(owner_id);
            }
            PointFilter::Active => {
                builder.push(" WHERE is_active = true");
            }
            PointFilter::AwaitingModeration => {
                builder.push(" WHERE is_active = false AND status = ");
                builder.push_bind(PointStatus::Pending);
            }
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<CollectionPointRow>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_children(rows).await
    }

    async fn get_point(&self, id: i64) -> Result<Option<CollectionPoint>> {
        let sql = format!("SELECT {POINT_COLUMNS} FROM collection_points WHERE id = $1");
        let row = sqlx::query_as::<_, CollectionPointRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.attach_one(row).await
    }

    async fn point_exists(&self, id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM collection_points WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// create_point
    ///
    /// Inserts the merged submission. `is_active`/`status` come from the
    /// `NewCollectionPoint`, which only `submitted_by` constructs.
    async fn create_point(&self, point: NewCollectionPoint) -> Result<CollectionPoint> {
        let sql = format!(
            "INSERT INTO collection_points \
             (owner_id, collection_type_id, name, description, address, latitude, longitude, \
              is_active, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW()) \
             RETURNING {POINT_COLUMNS}"
        );
        let draft = point.draft;
        let row = sqlx::query_as::<_, CollectionPointRow>(&sql)
            .bind(point.owner_id)
            .bind(draft.collection_type_id)
            .bind(draft.name)
            .bind(draft.description)
            .bind(draft.address)
            .bind(draft.latitude)
            .bind(draft.longitude)
            .bind(point.is_active)
            .bind(point.status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.with_children(vec![], vec![]))
    }

    /// update_point
    ///
    /// COALESCE keeps every column whose field in `req` is `None`. The two
    /// clearable columns use a "was sent" flag instead, since `NULL` is a
    /// legal new value for them.
    async fn update_point(
        &self,
        id: i64,
        req: UpdatePointRequest,
    ) -> Result<Option<CollectionPoint>> {
        let sql = format!(
            "UPDATE collection_points \
             SET name = COALESCE($2, name), \
                 description = CASE WHEN $8 THEN $3 ELSE description END, \
                 address = COALESCE($4, address), \
                 latitude = COALESCE($5, latitude), \
                 longitude = COALESCE($6, longitude), \
                 collection_type_id = CASE WHEN $9 THEN $7 ELSE collection_type_id END, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {POINT_COLUMNS}"
        );
        let set_description = req.description.is_some();
        let set_type = req.collection_type_id.is_some();
        let row = sqlx::query_as::<_, CollectionPointRow>(&sql)
            .bind(id)
            .bind(req.name.map(|n| n.trim().to_string()))
            .bind(req.description.flatten())
            .bind(req.address.map(|a| a.trim().to_string()))
            .bind(req.latitude)
            .bind(req.longitude)
            .bind(req.collection_type_id.flatten())
            .bind(set_description)
            .bind(set_type)
            .fetch_optional(&self.pool)
            .await?;
        self.attach_one(row).await
    }

    async fn moderate_point(
        &self,
        id: i64,
        change: ModerationChange,
    ) -> Result<Option<CollectionPoint>> {
        let sql = format!(
            "UPDATE collection_points \
             SET is_active = COALESCE($2, is_active), \
                 status = COALESCE($3, status), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {POINT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CollectionPointRow>(&sql)
            .bind(id)
            .bind(change.is_active)
            .bind(change.status)
            .fetch_optional(&self.pool)
            .await?;
        self.attach_one(row).await
    }

    async fn delete_point(&self, id: i64) -> Result<bool> {
        // Children go with ON DELETE CASCADE.
        let res = sqlx::query("DELETE FROM collection_points WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- OPERATING HOURS ---

    async fn list_operating_hours(&self) -> Result<Vec<OperatingHour>> {
        let sql = format!("SELECT {HOUR_COLUMNS} FROM operating_hours ORDER BY id");
        let hours = sqlx::query_as::<_, OperatingHour>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(hours)
    }

    async fn list_point_operating_hours(&self, point_id: i64) -> Result<Vec<OperatingHour>> {
        let sql = format!(
            "SELECT {HOUR_COLUMNS} FROM operating_hours \
             WHERE collection_point_id = $1 ORDER BY weekday, opens_at, id"
        );
        let hours = sqlx::query_as::<_, OperatingHour>(&sql)
            .bind(point_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(hours)
    }

    async fn create_operating_hour(&self, hour: NewOperatingHour) -> Result<OperatingHour> {
        let sql = format!(
            "INSERT INTO operating_hours (collection_point_id, weekday, opens_at, closes_at) \
             VALUES ($1, $2, $3, $4) RETURNING {HOUR_COLUMNS}"
        );
        let created = sqlx::query_as::<_, OperatingHour>(&sql)
            .bind(hour.collection_point_id)
            .bind(hour.weekday)
            .bind(hour.opens_at)
            .bind(hour.closes_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    // --- REVIEWS ---

    /// list_reviews
    ///
    /// Absent filter fields add no condition; present ones are AND-ed.
    async fn list_reviews(&self, filter: ReviewFilter) -> Result<Vec<PointReview>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {REVIEW_COLUMNS} FROM point_reviews WHERE TRUE"));

        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ");
            builder.push_bind(user_id);
        }
        if let Some(point_id) = filter.point_id {
            builder.push(" AND collection_point_id = ");
            builder.push_bind(point_id);
        }
        builder.push(" ORDER BY id");

        let reviews = builder
            .build_query_as::<PointReview>()
            .fetch_all(&self.pool)
            .await?;
        Ok(reviews)
    }

    async fn get_review(&self, id: i64) -> Result<Option<PointReview>> {
        let sql = format!("SELECT {REVIEW_COLUMNS} FROM point_reviews WHERE id = $1");
        let review = sqlx::query_as::<_, PointReview>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(review)
    }

    async fn create_review(&self, review: NewPointReview) -> Result<PointReview> {
        let sql = format!(
            "INSERT INTO point_reviews (user_id, collection_point_id, rating, comment, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) RETURNING {REVIEW_COLUMNS}"
        );
        let created = sqlx::query_as::<_, PointReview>(&sql)
            .bind(review.user_id)
            .bind(review.collection_point_id)
            .bind(review.rating)
            .bind(review.comment)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn update_review(
        &self,
        id: i64,
        req: UpdateReviewRequest,
    ) -> Result<Option<PointReview>> {
        let sql = format!(
            "UPDATE point_reviews \
             SET rating = COALESCE($2, rating), comment = COALESCE($3, comment) \
             WHERE id = $1 RETURNING {REVIEW_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, PointReview>(&sql)
            .bind(id)
            .bind(req.rating)
            .bind(req.comment)
            .fetch_optional(&self.pool)
            .await?;
        Ok(updated)
    }

    async fn delete_review(&self, id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM point_reviews WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- IMAGES ---

    async fn create_point_image(&self, image: NewPointImage) -> Result<PointImage> {
        let sql = format!(
            "INSERT INTO point_images (collection_point_id, image, url, uploaded_at) \
             VALUES ($1, $2, $3, NOW()) RETURNING {IMAGE_COLUMNS}"
        );
        let created = sqlx::query_as::<_, PointImage>(&sql)
            .bind(image.collection_point_id)
            .bind(image.image)
            .bind(image.url)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }
}
