use axum::extract::{Path, Query, State};
use axum::Json;
use executa_core::services::{CreateHandoff, EvaluateMessage};
use executa_core::ExecutaError;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_id, success, ApiError, ApiJson, ApiResultExt, AppState, CurrentUser};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    handoff_enabled: bool,
    #[serde(default)]
    handoff_settings: Value,
}

pub async fn create(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<CreateHandoff>,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to create handoff request";
    let assistant_id = parse_id(&assistant_id, ExecutaError::AssistantNotFound).or_api(FAILED)?;
    let created = state
        .services
        .handoff
        .create(&user, assistant_id, input)
        .await
        .or_api(FAILED)?;
    success(created)
}

/// Unauthenticated: the chat widget polls this for its own session.
pub async fn status(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to fetch handoff status";
    let session_id = query.session_id.as_deref();
    if session_id.map_or(true, |s| s.trim().is_empty()) {
        return Err(ApiError::bad_request("Session ID required"));
    }
    let assistant_id =
        parse_id(&assistant_id, ExecutaError::HandoffRequestNotFound).or_api(FAILED)?;
    let view = state
        .services
        .handoff
        .status(assistant_id, session_id)
        .await
        .or_api(FAILED)?;
    success(view)
}

pub async fn evaluate(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<EvaluateMessage>,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to evaluate message";
    let assistant_id = parse_id(&assistant_id, ExecutaError::AssistantNotFound).or_api(FAILED)?;
    let evaluation = state
        .services
        .handoff
        .evaluate(&user, assistant_id, &input)
        .await
        .or_api(FAILED)?;
    success(evaluation)
}

pub async fn get_settings(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to fetch handoff settings";
    let assistant_id = parse_id(&assistant_id, ExecutaError::AssistantNotFound).or_api(FAILED)?;
    let view = state
        .services
        .handoff
        .get_settings(&user, assistant_id)
        .await
        .or_api(FAILED)?;
    success(view)
}

pub async fn update_settings(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(update): ApiJson<SettingsUpdate>,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to update handoff settings";
    let assistant_id = parse_id(&assistant_id, ExecutaError::AssistantNotFound).or_api(FAILED)?;
    let view = state
        .services
        .handoff
        .update_settings(&user, assistant_id, update.handoff_enabled, &update.handoff_settings)
        .await
        .or_api(FAILED)?;
    success(view)
}
