//! Human agent directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ExecutaResult;
use crate::models::{HumanAgent, User};
use crate::repo::Repositories;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_online: bool,
    pub is_available: bool,
    pub department: String,
    pub skills: Vec<String>,
    pub active_tickets: i64,
    pub last_active: Option<DateTime<Utc>>,
}

impl AgentView {
    fn new(agent: HumanAgent, active_tickets: i64) -> Self {
        Self {
            department: agent.department().to_string(),
            id: agent.id,
            name: agent.name,
            email: agent.email,
            is_online: agent.is_online,
            is_available: agent.is_available,
            skills: agent.skills,
            active_tickets,
            last_active: agent.last_active,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default = "default_available")]
    pub is_available: bool,
}

fn default_available() -> bool {
    true
}

impl Default for AgentProfileUpdate {
    fn default() -> Self {
        Self {
            name: None,
            department: None,
            skills: None,
            is_available: true,
        }
    }
}

pub struct AgentService {
    repos: Repositories,
}

impl AgentService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn list(&self, caller: &User) -> ExecutaResult<Vec<AgentView>> {
        let agents = self.repos.agents.list_agents(caller.account_id).await?;
        let counts = self.repos.agents.active_ticket_counts(caller.account_id).await?;

        Ok(agents
            .into_iter()
            .map(|agent| {
                let active = counts.get(&agent.id).copied().unwrap_or(0);
                AgentView::new(agent, active)
            })
            .collect())
    }

    /// Creates or updates the caller's own agent profile.
    pub async fn upsert_own(
        &self,
        caller: &User,
        update: AgentProfileUpdate,
    ) -> ExecutaResult<AgentView> {
        let name = update
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| caller.name.clone());

        let mut profile = HumanAgent::new(caller.account_id, caller.id, name, caller.email.clone());
        profile.departments = vec![update
            .department
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "General".to_string())];
        profile.skills = update.skills.unwrap_or_default();
        profile.is_available = update.is_available;
        profile.last_active = Some(Utc::now());

        let saved = self.repos.agents.upsert_agent(&profile).await?;
        info!(agent_id = %saved.id, user_id = %caller.id, "Agent profile saved");
        Ok(AgentView::new(saved, 0))
    }
}
