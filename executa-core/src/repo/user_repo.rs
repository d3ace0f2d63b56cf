use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::UserStore;
use crate::error::ExecutaResult;
use crate::models::{Account, User};

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserRepository {
    async fn insert_account(&self, account: &Account) -> ExecutaResult<Account> {
        let record = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, name, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, created_at
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(account.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_user(&self, user: &User) -> ExecutaResult<User> {
        let record = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, account_id, name, email, role, api_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, account_id, name, email, role, api_key, created_at
            "#,
        )
        .bind(user.id)
        .bind(user.account_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role)
        .bind(&user.api_key)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_user(&self, id: Uuid) -> ExecutaResult<Option<User>> {
        let record = sqlx::query_as::<_, User>(
            r#"
            SELECT id, account_id, name, email, role, api_key, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_api_key(&self, api_key: &str) -> ExecutaResult<Option<User>> {
        let record = sqlx::query_as::<_, User>(
            r#"
            SELECT id, account_id, name, email, role, api_key, created_at
            FROM users
            WHERE api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_owner(&self, account_id: Uuid) -> ExecutaResult<Option<User>> {
        let record = sqlx::query_as::<_, User>(
            r#"
            SELECT id, account_id, name, email, role, api_key, created_at
            FROM users
            WHERE account_id = $1 AND role = 'OWNER'
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
