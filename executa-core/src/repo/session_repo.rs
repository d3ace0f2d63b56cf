use async_trait::async_trait;
use sqlx::{PgPool, Postgres};

use super::SessionStore;
use crate::error::ExecutaResult;
use crate::models::{ChatMessage, ChatSession};

pub(crate) const SESSION_COLUMNS: &str = "id, account_id, assistant_id, customer_name, customer_email, \
     customer_phone, customer_metadata, status, channel, is_handed_off, assigned_agent_id, \
     created_at, updated_at";

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Shared with the handoff transaction.
pub(crate) async fn insert_message<'e, E>(executor: E, message: &ChatMessage) -> ExecutaResult<ChatMessage>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let record = sqlx::query_as::<_, ChatMessage>(
        r#"
        INSERT INTO chat_messages (id, session_id, assistant_id, content, message_type, sender, is_internal, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, session_id, assistant_id, content, message_type, sender, is_internal, created_at
        "#,
    )
    .bind(message.id)
    .bind(&message.session_id)
    .bind(message.assistant_id)
    .bind(&message.content)
    .bind(message.message_type)
    .bind(message.sender)
    .bind(message.is_internal)
    .bind(message.created_at)
    .fetch_one(executor)
    .await?;

    Ok(record)
}

#[async_trait]
impl SessionStore for PgSessionRepository {
    async fn insert_session(&self, session: &ChatSession) -> ExecutaResult<ChatSession> {
        let sql = format!(
            r#"
            INSERT INTO chat_sessions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {cols}
            "#,
            cols = SESSION_COLUMNS
        );

        let record = sqlx::query_as::<_, ChatSession>(&sql)
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
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_session(&self, id: &str) -> ExecutaResult<Option<ChatSession>> {
        let sql = format!("SELECT {} FROM chat_sessions WHERE id = $1", SESSION_COLUMNS);

        let record = sqlx::query_as::<_, ChatSession>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn append_message(&self, message: &ChatMessage) -> ExecutaResult<ChatMessage> {
        insert_message(&self.pool, message).await
    }

    async fn list_messages(&self, session_id: &str) -> ExecutaResult<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, session_id, assistant_id, content, message_type, sender, is_internal, created_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
