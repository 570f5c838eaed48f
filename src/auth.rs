use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    repository::RepositoryState,
};

/// Header accepted in `Env::Local` in place of a bearer token.
pub const DEV_USER_HEADER: &str = "x-user-id";

/// Claims
///
/// Payload expected inside the HS256 bearer token issued by the identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: i64,
    pub exp: usize,
    pub iat: usize,
}

/// AuthUser
///
/// The resolved identity of an authenticated request: a stable user id and the
/// administrator flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub is_staff: bool,
}

impl AuthUser {
    /// Owners and staff may edit or delete a resource.
    pub fn may_edit(&self, owner_id: i64) -> bool {
        self.is_staff || self.id == owner_id
    }

    /// Fails with `AppError::Forbidden` unless the caller is staff.
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "administrator privileges are required".to_string(),
            ))
        }
    }
}

/// AuthUser Extractor
///
/// Resolution order:
/// 1. In `Env::Local`, an `x-user-id` header naming an existing user.
/// 2. An `Authorization: Bearer <jwt>` header validated with the configured secret.
///
/// The user is then looked up in the repository so deleted users lose access
/// even with a valid token. Any failure rejects with `AppError::Unauthorized`.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let dev_user_id = parts
                .headers
                .get(DEV_USER_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.trim().parse::<i64>().ok());
            if let Some(user_id) = dev_user_id {
                if let Some(user) = repo.get_user(user_id).await? {
                    return Ok(AuthUser {
                        id: user.id,
                        is_staff: user.is_staff,
                    });
                }
            }
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
            tracing::debug!("rejected bearer token: {:?}", e.kind());
            AppError::Unauthorized
        })?;

        let user = repo
            .get_user(token_data.claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthUser {
            id: user.id,
            is_staff: user.is_staff,
        })
    }
}
