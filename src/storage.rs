use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to store object {key}: {reason}")]
    Upload { key: String, reason: String },
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// StorageService
///
/// Contract for the object storage holding collection point images. The real
/// implementation talks to S3/MinIO; tests use `MockStorageService`.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket when missing. Called at startup in `Env::Local`.
    async fn ensure_bucket_exists(&self);

    /// Stores `body` under `key` and returns the public URL of the stored object.
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// S3StorageClient
///
/// `StorageService` backed by the AWS SDK. Path-style addressing keeps it
/// compatible with MinIO.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_base_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket fails harmlessly.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket {}: {:?}", self.bucket_name, e);
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = sanitize_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so a key can never escape its prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// An object written to `MockStorageService`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub content_type: String,
    pub size: usize,
}

/// MockStorageService
///
/// In-memory `StorageService` for tests. Records every stored object and can be
/// told to fail every write.
#[derive(Default)]
pub struct MockStorageService {
    /// When true, all writes return a simulated failure.
    pub should_fail: bool,
    objects: Mutex<Vec<StoredObject>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn stored_objects(&self) -> Vec<StoredObject> {
        self.objects
            .lock()
            .map(|objects| objects.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = sanitize_key(key);
        if self.should_fail {
            return Err(StorageError::Upload {
                key,
                reason: "mock storage failure requested".to_string(),
            });
        }

        let object = StoredObject {
            key: key.clone(),
            content_type: content_type.to_string(),
            size: body.len(),
        };
        if let Ok(mut objects) = self.objects.lock() {
            objects.push(object);
        }

        Ok(format!("http://localhost:9000/mock-bucket/{key}"))
    }
}

/// StorageState
///
/// The shared handle to the storage service stored in `AppState`.
pub type StorageState = Arc<dyn StorageService>;
