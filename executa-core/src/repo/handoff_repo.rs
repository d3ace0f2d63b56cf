use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::outbox_repo::insert_entry;
use super::session_repo::{insert_message, SESSION_COLUMNS};
use super::{HandoffDraft, HandoffStore, TicketFilter, TicketSummary, TicketUpdate};
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::{ChatSession, HandoffRequest};

const HANDOFF_COLUMNS: &str = "id, account_id, session_id, assistant_id, reason, priority, context, \
     customer_query, settings_snapshot, status, assigned_agent_id, zendesk_ticket_id, zendesk_url, \
     created_at, assigned_at, accepted_at, resolved_at, updated_at";

pub struct PgHandoffRepository {
    pool: PgPool,
}

impl PgHandoffRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HandoffStore for PgHandoffRepository {
    async fn create_handoff(&self, draft: &HandoffDraft) -> ExecutaResult<ChatSession> {
        let mut tx = self.pool.begin().await?;

        let session = &draft.session;
        let insert_session = format!(
            r#"
            INSERT INTO chat_sessions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
            cols = SESSION_COLUMNS
        );
        sqlx::query(&insert_session)
            .bind(&session.id)
            .bind(session.account_id)
            .bind(session.assistant_id)
            .bind(&session.customer_name)
            .bind(&session.customer_email)
            .bind(&session.customer_phone)
            .bind(&session.customer_metadata)
            .bind(session.status)
            .bind(&session.channel)
            .bind(session.is_handed_off)
            .bind(session.assigned_agent_id)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&mut *tx)
            .await?;

        let request = &draft.request;
        let insert_request = format!(
            r#"
            INSERT INTO handoff_requests ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
            cols = HANDOFF_COLUMNS
        );
        sqlx::query(&insert_request)
            .bind(request.id)
            .bind(request.account_id)
            .bind(&request.session_id)
            .bind(request.assistant_id)
            .bind(request.reason)
            .bind(request.priority)
            .bind(&request.context)
            .bind(&request.customer_query)
            .bind(&request.settings_snapshot)
            .bind(request.status)
            .bind(request.assigned_agent_id)
            .bind(request.zendesk_ticket_id)
            .bind(&request.zendesk_url)
            .bind(request.created_at)
            .bind(request.assigned_at)
            .bind(request.accepted_at)
            .bind(request.resolved_at)
            .bind(request.updated_at)
            .execute(&mut *tx)
            .await?;

        let transfer = format!(
            r#"
            UPDATE chat_sessions
            SET is_handed_off = TRUE, status = 'TRANSFERRED', updated_at = NOW()
            WHERE id = $1
            RETURNING {cols}
            "#,
            cols = SESSION_COLUMNS
        );
        let transferred = sqlx::query_as::<_, ChatSession>(&transfer)
            .bind(&session.id)
            .fetch_one(&mut *tx)
            .await?;

        insert_message(&mut *tx, &draft.notice).await?;

        for entry in &draft.outbox {
            insert_entry(&mut *tx, entry).await?;
        }

        tx.commit()
            .await
            .map_err(|e| ExecutaError::DatabaseTransactionFailed(e.to_string()))?;

        debug!(handoff_id = %request.id, session_id = %session.id, "Handoff persisted");
        Ok(transferred)
    }

    async fn get_handoff(&self, id: Uuid) -> ExecutaResult<Option<HandoffRequest>> {
        let sql = format!(
            "SELECT {} FROM handoff_requests WHERE id = $1",
            HANDOFF_COLUMNS
        );
        let record = sqlx::query_as::<_, HandoffRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn latest_for_session(
        &self,
        assistant_id: Uuid,
        session_id: &str,
    ) -> ExecutaResult<Option<HandoffRequest>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM handoff_requests
            WHERE assistant_id = $1 AND session_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            HANDOFF_COLUMNS
        );
        let record = sqlx::query_as::<_, HandoffRequest>(&sql)
            .bind(assistant_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn list_tickets(
        &self,
        account_id: Uuid,
        filter: &TicketFilter,
    ) -> ExecutaResult<(Vec<TicketSummary>, i64)> {
        let records = sqlx::query_as::<_, TicketSummary>(
            r#"
            SELECT h.id, h.account_id, h.session_id, h.assistant_id, h.reason, h.priority,
                   h.context, h.customer_query, h.settings_snapshot, h.status, h.assigned_agent_id,
                   h.zendesk_ticket_id, h.zendesk_url, h.created_at, h.assigned_at,
                   h.accepted_at, h.resolved_at, h.updated_at,
                   a.name AS assistant_name,
                   s.customer_name, s.customer_email, s.customer_phone, s.channel,
                   ag.name AS agent_name, ag.email AS agent_email,
                   (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = h.session_id) AS message_count,
                   (SELECT MAX(m.created_at) FROM chat_messages m WHERE m.session_id = h.session_id) AS last_message_at
            FROM handoff_requests h
            JOIN assistants a ON a.id = h.assistant_id
            JOIN chat_sessions s ON s.id = h.session_id
            LEFT JOIN human_agents ag ON ag.id = h.assigned_agent_id
            WHERE h.account_id = $1
              AND ($2::handoff_status IS NULL OR h.status = $2)
              AND ($3::handoff_priority IS NULL OR h.priority = $3)
              AND ($4::uuid IS NULL OR h.assigned_agent_id = $4)
            ORDER BY h.created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(account_id)
        .bind(filter.status)
        .bind(filter.priority)
        .bind(filter.assigned_agent_id)
        .bind(i64::from(filter.limit))
        .bind(i64::from(filter.offset()))
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM handoff_requests h
            WHERE h.account_id = $1
              AND ($2::handoff_status IS NULL OR h.status = $2)
              AND ($3::handoff_priority IS NULL OR h.priority = $3)
              AND ($4::uuid IS NULL OR h.assigned_agent_id = $4)
            "#,
        )
        .bind(account_id)
        .bind(filter.status)
        .bind(filter.priority)
        .bind(filter.assigned_agent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((records, total.0))
    }

    async fn apply_ticket_update(&self, update: &TicketUpdate) -> ExecutaResult<HandoffRequest> {
        let mut tx = self.pool.begin().await?;
        let request = &update.request;

        let sql = format!(
            r#"
            UPDATE handoff_requests
            SET priority = $2, status = $3, context = $4, assigned_agent_id = $5,
                assigned_at = $6, accepted_at = $7, resolved_at = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            HANDOFF_COLUMNS
        );
        let updated = sqlx::query_as::<_, HandoffRequest>(&sql)
            .bind(request.id)
            .bind(request.priority)
            .bind(request.status)
            .bind(&request.context)
            .bind(request.assigned_agent_id)
            .bind(request.assigned_at)
            .bind(request.accepted_at)
            .bind(request.resolved_at)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ExecutaError::HandoffRequestNotFound(request.id.to_string()))?;

        if let Some(status) = update.session_status {
            sqlx::query("UPDATE chat_sessions SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(&updated.session_id)
                .bind(status)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(notice) = &update.notice {
            insert_message(&mut *tx, notice).await?;
        }

        tx.commit()
            .await
            .map_err(|e| ExecutaError::DatabaseTransactionFailed(e.to_string()))?;

        Ok(updated)
    }

    async fn assign_if_pending(
        &self,
        request_id: Uuid,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> ExecutaResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Locking the agent row serializes concurrent assignments to it, so
        // the load count below sees every committed assignment.
        let capacity: Option<(i32,)> =
            sqlx::query_as("SELECT max_chats FROM human_agents WHERE id = $1 FOR UPDATE")
                .bind(agent_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((max_chats,)) = capacity else {
            tx.rollback().await?;
            return Ok(false);
        };

        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE handoff_requests
            SET assigned_agent_id = $2, status = 'ASSIGNED', assigned_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'PENDING' AND assigned_agent_id IS NULL
            RETURNING session_id
            "#,
        )
        .bind(request_id)
        .bind(agent_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((session_id,)) = claimed else {
            tx.rollback().await?;
            return Ok(false);
        };

        let (load,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM chat_sessions
            WHERE assigned_agent_id = $1
              AND status IN ('ACTIVE', 'TRANSFERRED')
              AND id <> $2
            "#,
        )
        .bind(agent_id)
        .bind(&session_id)
        .fetch_one(&mut *tx)
        .await?;
        if load >= i64::from(max_chats) {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE chat_sessions SET assigned_agent_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(&session_id)
        .bind(agent_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE human_agents SET last_assigned_at = $2 WHERE id = $1")
            .bind(agent_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| ExecutaError::DatabaseTransactionFailed(e.to_string()))?;

        Ok(true)
    }

    async fn find_by_zendesk_id(
        &self,
        account_id: Uuid,
        zendesk_ticket_id: i64,
    ) -> ExecutaResult<Option<HandoffRequest>> {
        let sql = format!(
            "SELECT {} FROM handoff_requests WHERE account_id = $1 AND zendesk_ticket_id = $2",
            HANDOFF_COLUMNS
        );
        let record = sqlx::query_as::<_, HandoffRequest>(&sql)
            .bind(account_id)
            .bind(zendesk_ticket_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn set_zendesk_link(
        &self,
        id: Uuid,
        zendesk_ticket_id: i64,
        zendesk_url: &str,
    ) -> ExecutaResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE handoff_requests
            SET zendesk_ticket_id = $2, zendesk_url = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(zendesk_ticket_id)
        .bind(zendesk_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExecutaError::HandoffRequestNotFound(id.to_string()));
        }
        Ok(())
    }
}
