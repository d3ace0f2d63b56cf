use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{Stream, StreamExt};
use std::time::Duration;
use tracing::debug;

use super::{AppState, CurrentUser};

/// Live ticket events for the caller's account.
pub async fn stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!(account_id = %user.account_id, user_id = %user.id, "Event stream opened");

    let events = state
        .services
        .events
        .account_stream(user.account_id)
        .map(|event| Event::default().event(event.kind.as_str()).json_data(&event));

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
