use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use super::{OutboxFilter, OutboxStore};
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::OutboxEntry;

const OUTBOX_COLUMNS: &str = "id, account_id, handoff_request_id, channel, target, payload, status, \
     attempts, max_attempts, last_error, next_attempt_at, leased_until, created_at, delivered_at";

pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn lease_until(now: DateTime<Utc>, lease: Duration) -> ExecutaResult<DateTime<Utc>> {
    let lease = TimeDelta::from_std(lease)
        .map_err(|e| ExecutaError::Internal(format!("Invalid outbox lease: {}", e)))?;
    Ok(now + lease)
}

/// Shared with the handoff transaction.
pub(crate) async fn insert_entry<'e, E>(executor: E, entry: &OutboxEntry) -> ExecutaResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        INSERT INTO notification_outbox ({})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
        OUTBOX_COLUMNS
    );
    sqlx::query(&sql)
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.handoff_request_id)
        .bind(entry.channel)
        .bind(&entry.target)
        .bind(&entry.payload)
        .bind(entry.status)
        .bind(entry.attempts)
        .bind(entry.max_attempts)
        .bind(&entry.last_error)
        .bind(entry.next_attempt_at)
        .bind(entry.leased_until)
        .bind(entry.created_at)
        .bind(entry.delivered_at)
        .execute(executor)
        .await?;

    Ok(())
}

#[async_trait]
impl OutboxStore for PgOutboxRepository {
    async fn enqueue(&self, entries: &[OutboxEntry]) -> ExecutaResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            insert_entry(&mut *tx, entry).await?;
        }
        tx.commit()
            .await
            .map_err(|e| ExecutaError::DatabaseTransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> ExecutaResult<Option<OutboxEntry>> {
        let sql = format!(
            "SELECT {} FROM notification_outbox WHERE id = $1",
            OUTBOX_COLUMNS
        );
        let record = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> ExecutaResult<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            UPDATE notification_outbox
            SET next_attempt_at = $2, leased_until = $2
            WHERE id IN (
                SELECT id
                FROM notification_outbox
                WHERE status IN ('pending', 'failed') AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        );
        let records = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(now)
            .bind(lease_until(now, lease)?)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn claim_ids(
        &self,
        ids: &[Uuid],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> ExecutaResult<Vec<OutboxEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            UPDATE notification_outbox
            SET next_attempt_at = $2, leased_until = $2
            WHERE id IN (
                SELECT id
                FROM notification_outbox
                WHERE id = ANY($3)
                  AND status IN ('pending', 'failed')
                  AND next_attempt_at <= $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        );
        let records = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(now)
            .bind(lease_until(now, lease)?)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> ExecutaResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET status = 'delivered', delivered_at = $2, attempts = attempts + 1, last_error = NULL,
                leased_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        dead: bool,
    ) -> ExecutaResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET status = CASE WHEN $5 THEN 'dead'::outbox_status ELSE 'failed'::outbox_status END,
                attempts = $2,
                last_error = $3,
                next_attempt_at = $4,
                leased_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(next_attempt_at)
        .bind(dead)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_outbox(&self, filter: &OutboxFilter) -> ExecutaResult<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM notification_outbox
            WHERE ($1::uuid IS NULL OR account_id = $1)
              AND ($2::outbox_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            OUTBOX_COLUMNS
        );
        let records = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(filter.account_id)
            .bind(filter.status)
            .bind(i64::from(filter.limit.max(1)))
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn requeue(
        &self,
        account_id: Option<Uuid>,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> ExecutaResult<OutboxEntry> {
        let sql = format!(
            r#"
            UPDATE notification_outbox
            SET status = 'pending', attempts = 0, last_error = NULL, next_attempt_at = $3
            WHERE id = $2
              AND ($1::uuid IS NULL OR account_id = $1)
              AND status <> 'delivered'
              AND (leased_until IS NULL OR leased_until <= $3)
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        );
        let record = sqlx::query_as::<_, OutboxEntry>(&sql)
            .bind(account_id)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(entry) = record {
            return Ok(entry);
        }

        let exists = self
            .get_entry(id)
            .await?
            .is_some_and(|e| account_id.is_none_or(|a| e.account_id == a));
        if exists {
            Err(ExecutaError::OutboxEntryBusy(id.to_string()))
        } else {
            Err(ExecutaError::OutboxEntryNotFound(id.to_string()))
        }
    }

    async fn requeue_dead(
        &self,
        account_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ExecutaResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_outbox
            SET status = 'pending', attempts = 0, last_error = NULL, next_attempt_at = $2
            WHERE status = 'dead' AND ($1::uuid IS NULL OR account_id = $1)
            "#,
        )
        .bind(account_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
