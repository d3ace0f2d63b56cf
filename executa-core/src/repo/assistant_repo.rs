use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::AssistantStore;
use crate::error::ExecutaResult;
use crate::models::Assistant;

pub struct PgAssistantRepository {
    pool: PgPool,
}

impl PgAssistantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssistantStore for PgAssistantRepository {
    async fn insert_assistant(&self, assistant: &Assistant) -> ExecutaResult<Assistant> {
        let record = sqlx::query_as::<_, Assistant>(
            r#"
            INSERT INTO assistants (id, account_id, name, handoff_enabled, handoff_settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, account_id, name, handoff_enabled, handoff_settings, created_at, updated_at
            "#,
        )
        .bind(assistant.id)
        .bind(assistant.account_id)
        .bind(&assistant.name)
        .bind(assistant.handoff_enabled)
        .bind(&assistant.handoff_settings)
        .bind(assistant.created_at)
        .bind(assistant.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_assistant(&self, id: Uuid) -> ExecutaResult<Option<Assistant>> {
        let record = sqlx::query_as::<_, Assistant>(
            r#"
            SELECT id, account_id, name, handoff_enabled, handoff_settings, created_at, updated_at
            FROM assistants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_handoff_settings(
        &self,
        id: Uuid,
        enabled: bool,
        settings: &serde_json::Value,
    ) -> ExecutaResult<Option<Assistant>> {
        let record = sqlx::query_as::<_, Assistant>(
            r#"
            UPDATE assistants
            SET handoff_enabled = $2, handoff_settings = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, account_id, name, handoff_enabled, handoff_settings, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(enabled)
        .bind(settings)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
