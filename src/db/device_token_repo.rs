use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::devices::DeviceToken;

use super::DbError;

/// Repository trait for device-token persistence (spec.md 4.1), covering
/// the CRUD surface the HTTP layer needs plus the scheduler's
/// `active_tokens` query.
#[async_trait]
pub trait DeviceTokenRepository: Send + Sync {
    async fn create(&self, user_id: i64, push_token: &str, device_id: &str) -> Result<i64, DbError>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError>;

    async fn soft_delete(&self, token_id: i64) -> Result<(), DbError>;

    /// All active (non-deleted) tokens for a user. Empty is a normal result,
    /// not an error (spec.md 4.1).
    async fn active_tokens(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError>;

    async fn ping(&self) -> Result<(), DbError>;
}

pub struct SqliteDeviceTokenRepository {
    pool: SqlitePool,
}

impl SqliteDeviceTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_token(row: DeviceTokenRow) -> DeviceToken {
        DeviceToken {
            token_id: row.id,
            user_id: row.user_id,
            push_token: row.push_token,
            device_id: row.device_id,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceTokenRow {
    id: i64,
    user_id: i64,
    push_token: String,
    device_id: String,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const TOKEN_COLUMNS: &str = "id, user_id, push_token, device_id, deleted_at, created_at, updated_at";

#[async_trait]
impl DeviceTokenRepository for SqliteDeviceTokenRepository {
    async fn create(&self, user_id: i64, push_token: &str, device_id: &str) -> Result<i64, DbError> {
        let result = sqlx::query(
            "INSERT INTO device_tokens (user_id, push_token, device_id) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(push_token)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError> {
        let rows: Vec<DeviceTokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM device_tokens WHERE user_id = ? AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_token).collect())
    }

    async fn soft_delete(&self, token_id: i64) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE device_tokens SET deleted_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(token_id.to_string()));
        }
        Ok(())
    }

    async fn active_tokens(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError> {
        self.list_by_user(user_id).await
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations, DbConfig};

    async fn setup_test_db() -> SqlitePool {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_active_tokens() {
        let pool = setup_test_db().await;
        let repo = SqliteDeviceTokenRepository::new(pool);

        repo.create(1, "ExponentPushToken[aaa]", "device-a").await.unwrap();
        repo.create(1, "ExponentPushToken[bbb]", "device-b").await.unwrap();
        repo.create(2, "ExponentPushToken[ccc]", "device-c").await.unwrap();

        let tokens = repo.active_tokens(1).await.unwrap();
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn soft_deleted_token_excluded_from_active_tokens() {
        let pool = setup_test_db().await;
        let repo = SqliteDeviceTokenRepository::new(pool);

        let id = repo.create(1, "ExponentPushToken[aaa]", "device-a").await.unwrap();
        repo.soft_delete(id).await.unwrap();

        let tokens = repo.active_tokens(1).await.unwrap();
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn active_tokens_for_unknown_user_is_empty_not_error() {
        let pool = setup_test_db().await;
        let repo = SqliteDeviceTokenRepository::new(pool);

        let tokens = repo.active_tokens(42).await.unwrap();
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn soft_delete_on_vanished_row_is_not_found() {
        let pool = setup_test_db().await;
        let repo = SqliteDeviceTokenRepository::new(pool);

        let result = repo.soft_delete(9999).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }
}
