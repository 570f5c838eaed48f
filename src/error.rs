use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use validator::ValidationErrors;

/// Per-field failure reasons reported back to the client.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// AppError
///
/// The error taxonomy surfaced by every handler. Each variant maps to exactly one
/// HTTP status; there is no retryable class.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        fields: Option<FieldErrors>,
    },

    #[error("authentication required")]
    Unauthorized,

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            fields: None,
        }
    }

    /// A validation failure attributed to a single request field.
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![reason.clone()]);
        AppError::Validation {
            message: format!("{field}: {reason}"),
            fields: Some(fields),
        }
    }

    pub fn point_not_found(id: i64) -> Self {
        AppError::NotFound(format!("collection point {id} does not exist"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Machine-readable error body.
#[derive(Debug, Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AppError::Validation { message, fields } => ErrorBody {
                error: "validation_error".to_string(),
                message,
                fields,
            },
            AppError::Unauthorized => ErrorBody {
                error: "authentication_required".to_string(),
                message: "authentication credentials were not provided or are invalid"
                    .to_string(),
                fields: None,
            },
            AppError::Forbidden(message) => ErrorBody {
                error: "permission_denied".to_string(),
                message,
                fields: None,
            },
            AppError::NotFound(message) => ErrorBody {
                error: "not_found".to_string(),
                message,
                fields: None,
            },
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                ErrorBody {
                    error: "internal_error".to_string(),
                    message: "database error occurred".to_string(),
                    fields: None,
                }
            }
            AppError::Storage(e) => {
                tracing::error!("storage error: {}", e);
                ErrorBody {
                    error: "storage_error".to_string(),
                    message: "failed to store file".to_string(),
                    fields: None,
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let fields: FieldErrors = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reasons = errs
                    .iter()
                    .map(|e| match &e.message {
                        Some(msg) => msg.to_string(),
                        None => e.code.to_string(),
                    })
                    .collect();
                (field.to_string(), reasons)
            })
            .collect();

        AppError::Validation {
            message: errors.to_string(),
            fields: Some(fields),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("invalid JSON data: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(err) => {
                format!("invalid JSON syntax: {}", err.body_text())
            }
            JsonRejection::MissingJsonContentType(_) => {
                "expected request with `Content-Type: application/json`".to_string()
            }
            other => format!("failed to parse JSON body: {}", other.body_text()),
        };
        AppError::validation(message)
    }
}

/// ApiJson
///
/// JSON body extractor whose rejections are reported as `AppError::Validation` (400)
/// instead of axum's plain-text 415/422 responses.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Forbidden("admin only".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::point_not_found(1).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_field_names_the_field() {
        match AppError::invalid_field("status", "unknown value") {
            AppError::Validation { fields: Some(fields), .. } => {
                assert_eq!(fields["status"], vec!["unknown value".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
