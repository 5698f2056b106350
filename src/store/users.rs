//! User records backed by PostgreSQL

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, UserStore};

/// A registered player
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub github_id: i64,
    pub github_login: String,
    pub gnu_balance: i64,
    pub rate: i32,
    /// OAuth token at rest; never serialized outward
    #[serde(skip_serializing, default)]
    pub encrypted_token: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// New user for first-contact insertion
#[derive(Debug, Clone)]
pub struct NewUser {
    pub github_id: i64,
    pub github_login: String,
}

const USER_COLUMNS: &str =
    "id, github_id, github_login, gnu_balance, rate, encrypted_token, created_at, updated_at";

/// User store over a Postgres pool
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => StoreError::NotFound,
                other => StoreError::Database(other),
            })
    }

    async fn get_by_github_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE github_login = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (id, github_id, github_login, encrypted_token) \
             VALUES ($1, $2, $3, '') \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4())
            .bind(new.github_id)
            .bind(&new.github_login)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_gnu_balance(&self, id: Uuid, balance: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET gnu_balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(balance)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
