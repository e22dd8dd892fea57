//! Shared-secret authentication for the cron endpoints

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;

use crate::error::ApiError;

/// The configured cron secret. `None` disables the check, which
/// `Config::from_env` only allows outside production.
#[derive(Debug, Clone, Default)]
pub struct CronSecret(pub Option<Arc<str>>);

impl CronSecret {
    pub fn new(secret: Option<String>) -> Self {
        Self(secret.map(Arc::from))
    }
}

/// Proof that the caller presented `Authorization: Bearer <CRON_SECRET>`
///
/// ```rust,ignore
/// async fn run(_auth: CronAuth, State(state): State<AppState>) -> impl IntoResponse { .. }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CronAuth;

#[async_trait]
impl<S> FromRequestParts<S> for CronAuth
where
    CronSecret: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CronSecret(secret) = CronSecret::from_ref(state);
        let Some(secret) = secret else {
            return Ok(CronAuth);
        };

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Unauthorized("Bearer token required".to_string()).into_response()
                })?;

        if !secrets_match(bearer.token(), &secret) {
            tracing::warn!(path = %parts.uri.path(), "Rejected cron request with invalid secret");
            return Err(ApiError::Unauthorized("Invalid cron secret".to_string()).into_response());
        }

        Ok(CronAuth)
    }
}

/// Compare a presented secret with the configured one in constant time
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
