use axum::extract::State;
use axum::Json;
use executa_core::ExecutaError;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{success, ApiError, ApiJson, ApiResultExt, AppState, CurrentUser};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZendeskAction {
    action: String,
    ticket_id: Option<String>,
    zendesk_ticket_id: Option<i64>,
    data: Option<Value>,
}

impl ZendeskAction {
    fn ticket_id(&self) -> Result<Uuid, ExecutaError> {
        let raw = self.ticket_id.as_deref().unwrap_or_default();
        Uuid::parse_str(raw.trim()).map_err(|_| ExecutaError::TicketNotFound(raw.to_string()))
    }
}

pub async fn dispatch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<ZendeskAction>,
) -> Result<Json<Value>, ApiError> {
    let zendesk = &state.services.zendesk;

    match body.action.as_str() {
        "create_zendesk_ticket" => {
            const FAILED: &str = "Failed to create Zendesk ticket";
            let ticket_id = body.ticket_id().or_api(FAILED)?;
            let created = zendesk
                .create_ticket(user.account_id, ticket_id)
                .await
                .or_api(FAILED)?;
            success(created)
        }
        "sync_from_zendesk" => {
            const FAILED: &str = "Failed to sync from Zendesk";
            let zendesk_ticket_id = body
                .zendesk_ticket_id
                .ok_or_else(|| ApiError::bad_request("zendeskTicketId is required"))?;
            let synced = zendesk
                .sync_from(user.account_id, zendesk_ticket_id)
                .await
                .or_api(FAILED)?;
            success(synced)
        }
        "sync_to_zendesk" => {
            const FAILED: &str = "Failed to sync to Zendesk";
            let ticket_id = body.ticket_id().or_api(FAILED)?;
            let synced = zendesk
                .sync_to(user.account_id, ticket_id, body.data.as_ref())
                .await
                .or_api(FAILED)?;
            success(synced)
        }
        _ => Err(ApiError::bad_request("Invalid action")),
    }
}
