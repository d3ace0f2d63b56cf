use axum::extract::State;
use axum::Json;
use executa_core::services::AgentProfileUpdate;
use serde_json::{json, Value};

use super::{success, ApiError, ApiJson, ApiResultExt, AppState, CurrentUser};

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let agents = state
        .services
        .agents
        .list(&user)
        .await
        .or_api("Failed to fetch agents")?;
    success(json!({ "agents": agents }))
}

pub async fn upsert(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(update): ApiJson<AgentProfileUpdate>,
) -> Result<Json<Value>, ApiError> {
    let agent = state
        .services
        .agents
        .upsert_own(&user, update)
        .await
        .or_api("Failed to create/update agent profile")?;
    success(json!({ "agent": agent }))
}
