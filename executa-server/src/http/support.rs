use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use executa_core::services::SupportTicketRequest;
use serde_json::Value;

use super::{success, ApiError, ApiJson, ApiResultExt, AppState, CurrentUser};

const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub async fn submit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<SupportTicketRequest>,
) -> Result<Json<Value>, ApiError> {
    let receipt = state
        .services
        .support
        .submit(&user, &request)
        .await
        .or_api("Failed to submit support ticket")?;
    success(receipt)
}

/// Inbound mail webhook. Authenticated by signature rather than API key, so
/// the raw body is kept for verification.
pub async fn email_reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let receipt = state
        .services
        .email_replies
        .receive(&body, signature)
        .await
        .or_api("Failed to process email reply")?;
    success(receipt)
}
