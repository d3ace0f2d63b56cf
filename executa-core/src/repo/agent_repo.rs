use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::AgentStore;
use crate::assignment::AgentLoad;
use crate::error::ExecutaResult;
use crate::models::HumanAgent;

const AGENT_COLUMNS: &str = "id, account_id, user_id, name, email, is_online, is_available, \
     max_chats, departments, skills, last_active, last_assigned_at, created_at";

#[derive(FromRow)]
struct AgentLoadRow {
    #[sqlx(flatten)]
    agent: HumanAgent,
    active_load: i64,
}

pub struct PgAgentRepository {
    pool: PgPool,
}

impl PgAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentStore for PgAgentRepository {
    async fn list_agents(&self, account_id: Uuid) -> ExecutaResult<Vec<HumanAgent>> {
        let sql = format!(
            "SELECT {} FROM human_agents WHERE account_id = $1 ORDER BY created_at ASC",
            AGENT_COLUMNS
        );
        let records = sqlx::query_as::<_, HumanAgent>(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn get_agent(&self, id: Uuid) -> ExecutaResult<Option<HumanAgent>> {
        let sql = format!("SELECT {} FROM human_agents WHERE id = $1", AGENT_COLUMNS);
        let record = sqlx::query_as::<_, HumanAgent>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_agent_by_user(&self, user_id: Uuid) -> ExecutaResult<Option<HumanAgent>> {
        let sql = format!(
            "SELECT {} FROM human_agents WHERE user_id = $1",
            AGENT_COLUMNS
        );
        let record = sqlx::query_as::<_, HumanAgent>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn upsert_agent(&self, agent: &HumanAgent) -> ExecutaResult<HumanAgent> {
        let sql = format!(
            r#"
            INSERT INTO human_agents ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id) DO UPDATE
            SET name = EXCLUDED.name,
                departments = EXCLUDED.departments,
                skills = EXCLUDED.skills,
                is_available = EXCLUDED.is_available,
                last_active = EXCLUDED.last_active
            RETURNING {cols}
            "#,
            cols = AGENT_COLUMNS
        );
        let record = sqlx::query_as::<_, HumanAgent>(&sql)
            .bind(agent.id)
            .bind(agent.account_id)
            .bind(agent.user_id)
            .bind(&agent.name)
            .bind(&agent.email)
            .bind(agent.is_online)
            .bind(agent.is_available)
            .bind(agent.max_chats)
            .bind(&agent.departments)
            .bind(&agent.skills)
            .bind(agent.last_active)
            .bind(agent.last_assigned_at)
            .bind(agent.created_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn agent_loads(&self, account_id: Uuid) -> ExecutaResult<Vec<AgentLoad>> {
        let rows = sqlx::query_as::<_, AgentLoadRow>(
            r#"
            SELECT a.id, a.account_id, a.user_id, a.name, a.email, a.is_online, a.is_available,
                   a.max_chats, a.departments, a.skills, a.last_active, a.last_assigned_at,
                   a.created_at,
                   (SELECT COUNT(*)
                    FROM chat_sessions s
                    WHERE s.assigned_agent_id = a.id
                      AND s.status IN ('ACTIVE', 'TRANSFERRED')) AS active_load
            FROM human_agents a
            WHERE a.account_id = $1 AND a.is_online AND a.is_available
            ORDER BY a.created_at ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AgentLoad::new(row.agent, row.active_load))
            .collect())
    }

    async fn active_ticket_counts(&self, account_id: Uuid) -> ExecutaResult<HashMap<Uuid, i64>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT assigned_agent_id, COUNT(*)
            FROM handoff_requests
            WHERE account_id = $1
              AND assigned_agent_id IS NOT NULL
              AND status IN ('ASSIGNED', 'ACCEPTED', 'IN_PROGRESS')
            GROUP BY assigned_agent_id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
