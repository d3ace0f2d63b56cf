use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use executa_core::User;

use super::error::{ApiError, ApiResultExt};
use super::AppState;

/// The user behind the request's `Authorization: Bearer <api key>`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(ApiError::unauthorized)?;
        let user = state
            .services
            .repos
            .users
            .find_by_api_key(token)
            .await
            .or_api("Failed to authenticate request")?
            .ok_or_else(ApiError::unauthorized)?;
        Ok(CurrentUser(user))
    }
}
