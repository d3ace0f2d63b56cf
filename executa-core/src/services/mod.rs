//! Request-level operations shared by the HTTP API and the CLI.

pub mod agents;
pub mod email_reply;
pub mod handoff;
pub mod support;
pub mod tickets;

pub use agents::{AgentProfileUpdate, AgentService, AgentView};
pub use email_reply::{EmailReplyReceipt, EmailReplyService, InboundEmail};
pub use handoff::{
    CreateHandoff, EvaluateMessage, HandoffCreated, HandoffService, HandoffSettingsView,
    HandoffStatusView, MessageEvaluation,
};
pub use support::{SupportService, SupportTicketReceipt, SupportTicketRequest};
pub use tickets::{
    CreateTicket, TicketActionOutcome, TicketActionRequest, TicketDetail, TicketListItem,
    TicketPage, TicketQuery, TicketService,
};

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ExecutaConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::events::TicketEvents;
use crate::models::{Assistant, HandoffRequest, User};
use crate::notify::{build_http_client, Notifier};
use crate::outbox::OutboxProcessor;
use crate::repo::Repositories;
use crate::zendesk::{ZendeskClient, ZendeskService};

/// Who a ticket is shown as assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedPerson {
    pub name: String,
    pub email: String,
}

impl AssignedPerson {
    fn placeholder() -> Self {
        Self {
            name: "Account Owner".to_string(),
            email: "Not Available".to_string(),
        }
    }
}

/// The assigned agent if there is one, otherwise the account owner.
pub(crate) async fn resolve_assignee(
    repos: &Repositories,
    request: &HandoffRequest,
) -> ExecutaResult<AssignedPerson> {
    if let Some(agent_id) = request.assigned_agent_id {
        if let Some(agent) = repos.agents.get_agent(agent_id).await? {
            return Ok(AssignedPerson {
                name: agent.name,
                email: agent.email,
            });
        }
    }

    Ok(repos
        .users
        .find_owner(request.account_id)
        .await?
        .map(|owner| AssignedPerson {
            name: owner.name,
            email: owner.email,
        })
        .unwrap_or_else(AssignedPerson::placeholder))
}

/// Loads an assistant, hiding assistants of other accounts.
pub(crate) async fn account_assistant(
    repos: &Repositories,
    caller: &User,
    assistant_id: Uuid,
) -> ExecutaResult<Assistant> {
    repos
        .assistants
        .get_assistant(assistant_id)
        .await?
        .filter(|a| a.account_id == caller.account_id)
        .ok_or_else(|| ExecutaError::AssistantNotFound(assistant_id.to_string()))
}

pub(crate) async fn account_ticket(
    repos: &Repositories,
    account_id: Uuid,
    ticket_id: Uuid,
) -> ExecutaResult<HandoffRequest> {
    repos
        .handoffs
        .get_handoff(ticket_id)
        .await?
        .filter(|t| t.account_id == account_id)
        .ok_or_else(|| ExecutaError::TicketNotFound(ticket_id.to_string()))
}

/// Everything the API needs, wired from one configuration.
#[derive(Clone)]
pub struct Services {
    pub repos: Repositories,
    pub events: TicketEvents,
    pub outbox: Arc<OutboxProcessor>,
    pub handoff: Arc<HandoffService>,
    pub tickets: Arc<TicketService>,
    pub agents: Arc<AgentService>,
    pub support: Arc<SupportService>,
    pub email_replies: Arc<EmailReplyService>,
    pub zendesk: Arc<ZendeskService>,
}

impl Services {
    pub fn new(config: &ExecutaConfig, repos: Repositories) -> ExecutaResult<Self> {
        let notifier = Arc::new(Notifier::new(config)?);
        let outbox = Arc::new(OutboxProcessor::new(
            repos.outbox.clone(),
            notifier.clone(),
            &config.notifications,
        ));
        let http = build_http_client(config.notifications.http_timeout())?;
        let zendesk_client = ZendeskClient::from_config(&config.zendesk, http);
        Ok(Self::from_parts(config, repos, notifier, outbox, zendesk_client))
    }

    pub fn from_parts(
        config: &ExecutaConfig,
        repos: Repositories,
        notifier: Arc<Notifier>,
        outbox: Arc<OutboxProcessor>,
        zendesk_client: Option<ZendeskClient>,
    ) -> Self {
        let events = TicketEvents::default();

        let handoff = Arc::new(HandoffService::new(
            repos.clone(),
            events.clone(),
            outbox.clone(),
            config,
        ));
        let tickets = Arc::new(TicketService::new(repos.clone(), events.clone()));
        let agents = Arc::new(AgentService::new(repos.clone()));
        let support = Arc::new(SupportService::new(notifier, &config.email));
        let email_replies = Arc::new(EmailReplyService::new(
            repos.clone(),
            events.clone(),
            &config.email,
        ));
        let zendesk = Arc::new(ZendeskService::new(repos.clone(), zendesk_client));

        Self {
            repos,
            events,
            outbox,
            handoff,
            tickets,
            agents,
            support,
            email_replies,
            zendesk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, HandoffReason, HumanAgent, Priority, UserRole};
    use crate::repo::MemoryStore;

    #[tokio::test]
    async fn test_assignee_prefers_agent_then_owner() {
        let repos = Repositories::memory(Arc::new(MemoryStore::new()));
        let account = repos.users.insert_account(&Account::new("Acme")).await.unwrap();
        let mut request = HandoffRequest::new(
            account.id,
            "s",
            Uuid::new_v4(),
            HandoffReason::CustomerRequest,
            Priority::Normal,
        );

        assert_eq!(
            resolve_assignee(&repos, &request).await.unwrap(),
            AssignedPerson::placeholder()
        );

        let owner = User::new(account.id, "Olive", "olive@acme.com", UserRole::Owner, "k1");
        repos.users.insert_user(&owner).await.unwrap();
        assert_eq!(resolve_assignee(&repos, &request).await.unwrap().name, "Olive");

        let agent = repos
            .agents
            .upsert_agent(&HumanAgent::new(account.id, owner.id, "Agent Ann", "ann@acme.com"))
            .await
            .unwrap();
        request.assigned_agent_id = Some(agent.id);
        let assignee = resolve_assignee(&repos, &request).await.unwrap();
        assert_eq!(assignee.email, "ann@acme.com");
    }
}
