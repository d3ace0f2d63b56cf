//! Per-account ticket events for live inbox updates.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketEventKind {
    NewTicket,
    TicketUpdated,
    NewMessage,
}

impl TicketEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketEventKind::NewTicket => "new_ticket",
            TicketEventKind::TicketUpdated => "ticket_updated",
            TicketEventKind::NewMessage => "new_message",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketEvent {
    pub kind: TicketEventKind,
    pub account_id: Uuid,
    pub ticket_id: Uuid,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl TicketEvent {
    pub fn new(
        kind: TicketEventKind,
        account_id: Uuid,
        ticket_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            account_id,
            ticket_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus shared by every account. Subscribers filter by account.
#[derive(Clone)]
pub struct TicketEvents {
    sender: broadcast::Sender<TicketEvent>,
}

impl Default for TicketEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TicketEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: TicketEvent) {
        let kind = event.kind;
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(kind = kind.as_str(), receivers, "Ticket event published");
    }

    pub fn emit(
        &self,
        kind: TicketEventKind,
        account_id: Uuid,
        ticket_id: Uuid,
        data: serde_json::Value,
    ) {
        self.publish(TicketEvent::new(kind, account_id, ticket_id, data));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }

    /// Events for one account. Lagging subscribers skip what they missed.
    pub fn account_stream(&self, account_id: Uuid) -> impl Stream<Item = TicketEvent> + Send + 'static {
        stream::unfold(self.subscribe(), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.account_id == account_id => return Some((event, rx)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(%account_id, skipped, "Event subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}
