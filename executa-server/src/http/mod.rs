//! The JSON API served by `executa serve`.

mod agents;
mod auth;
mod error;
mod events;
mod handoff;
mod outbox;
mod support;
mod tickets;
mod zendesk;

use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use executa_core::{ExecutaError, Services};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

pub use auth::CurrentUser;
pub use error::{success, ApiError, ApiJson, ApiResultExt};

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/chat/{assistant_id}/handoff",
            post(handoff::create).get(handoff::status),
        )
        .route(
            "/api/chat/{assistant_id}/handoff/evaluate",
            post(handoff::evaluate),
        )
        .route(
            "/api/assistants/{assistant_id}/handoff-settings",
            get(handoff::get_settings).put(handoff::update_settings),
        )
        .route(
            "/api/support/tickets",
            get(tickets::list).post(tickets::create),
        )
        .route(
            "/api/support/tickets/{ticket_id}",
            get(tickets::detail).put(tickets::apply_action),
        )
        .route(
            "/api/support/agents",
            get(agents::list).post(agents::upsert),
        )
        .route("/api/support/executa-ticket", post(support::submit))
        .route("/api/support/email/reply", post(support::email_reply))
        .route("/api/support/events", get(events::stream))
        .route("/api/integrations/zendesk/tickets", post(zendesk::dispatch))
        .route("/api/notifications/outbox", get(outbox::list))
        .route("/api/notifications/outbox/{entry_id}/retry", post(outbox::retry))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let storage = if state.services.repos.database().is_some() {
        "postgres"
    } else {
        "memory"
    };

    match state.services.repos.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "storage": storage, "database": "connected" })),
        ),
        Err(e) => {
            warn!(error_code = %e.error_code(), "Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "storage": storage, "database": "unreachable" })),
            )
        }
    }
}

/// Path ids that are not UUIDs cannot name anything, so they become the
/// caller's not-found error.
fn parse_id(raw: &str, not_found: impl FnOnce(String) -> ExecutaError) -> Result<Uuid, ExecutaError> {
    Uuid::parse_str(raw.trim()).map_err(|_| not_found(raw.to_string()))
}
