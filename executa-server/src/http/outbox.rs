use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use executa_core::{ExecutaError, OutboxFilter, OutboxStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_id, success, ApiError, ApiResultExt, AppState, CurrentUser};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct OutboxQuery {
    status: Option<String>,
    limit: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<OutboxQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(raw.parse::<OutboxStatus>().map_err(ApiError::bad_request)?),
    };
    let filter = OutboxFilter {
        account_id: Some(user.account_id),
        status,
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
    };

    let entries = state
        .services
        .repos
        .outbox
        .list_outbox(&filter)
        .await
        .or_api("Failed to fetch notification outbox")?;
    success(json!({ "entries": entries }))
}

/// Resets an entry to pending and attempts delivery right away. Entries
/// already delivered or in flight answer 409.
pub async fn retry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to retry notification";
    let entry_id = parse_id(&entry_id, ExecutaError::OutboxEntryNotFound).or_api(FAILED)?;
    if !user.is_owner() {
        return Err(ApiError::from_core(
            ExecutaError::Forbidden("Only account owner can retry notifications".to_string()),
            FAILED,
        ));
    }

    let entry = state
        .services
        .repos
        .outbox
        .requeue(Some(user.account_id), entry_id, Utc::now())
        .await
        .or_api(FAILED)?;

    info!(entry_id = %entry.id, channel = %entry.channel, "Notification requeued");
    state.services.outbox.spawn_immediate(vec![entry.id]);
    success(json!({ "entry": entry }))
}
