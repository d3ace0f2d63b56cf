use axum::extract::{Path, Query, State};
use axum::Json;
use executa_core::services::{CreateTicket, TicketActionRequest, TicketQuery};
use executa_core::ExecutaError;
use serde_json::{json, Value};

use super::{parse_id, success, ApiError, ApiJson, ApiResultExt, AppState, CurrentUser};

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<TicketQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .services
        .tickets
        .list(&user, &query)
        .await
        .or_api("Failed to fetch tickets")?;
    success(page)
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<CreateTicket>,
) -> Result<Json<Value>, ApiError> {
    let ticket = state
        .services
        .tickets
        .create(&user, input)
        .await
        .or_api("Failed to create ticket")?;
    success(json!({
        "ticket": {
            "id": ticket.id,
            "status": ticket.status,
            "priority": ticket.priority,
            "createdAt": ticket.created_at,
            "sessionId": ticket.session_id,
        }
    }))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(ticket_id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to fetch ticket";
    let ticket_id = parse_id(&ticket_id, ExecutaError::TicketNotFound).or_api(FAILED)?;
    let ticket = state
        .services
        .tickets
        .detail(&user, ticket_id)
        .await
        .or_api(FAILED)?;
    success(json!({ "ticket": ticket }))
}

pub async fn apply_action(
    State(state): State<AppState>,
    Path(ticket_id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<TicketActionRequest>,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to update ticket";
    let ticket_id = parse_id(&ticket_id, ExecutaError::TicketNotFound).or_api(FAILED)?;
    let outcome = state
        .services
        .tickets
        .apply_action(&user, ticket_id, &request)
        .await
        .or_api(FAILED)?;
    success(outcome)
}
