use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::SqlitePool;

use crate::alarms::Alarm;

use super::DbError;

/// Repository trait for alarm persistence (spec.md 4.1), covering both the
/// CRUD surface the HTTP layer needs and the two queries the scheduler
/// depends on: `due_alarms` and `mark_sent`.
#[async_trait]
pub trait AlarmRepository: Send + Sync {
    /// Insert a new alarm, returning its assigned id.
    async fn create(
        &self,
        user_id: i64,
        alarm_minute: NaiveTime,
        region: &str,
        enabled: bool,
    ) -> Result<i64, DbError>;

    /// All non-deleted alarms for a user.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Alarm>, DbError>;

    /// A single alarm by id, deleted or not.
    async fn get_by_id(&self, alarm_id: i64) -> Result<Option<Alarm>, DbError>;

    /// Soft-delete an alarm. Returns `NotFound` if no row matches.
    async fn soft_delete(&self, alarm_id: i64) -> Result<(), DbError>;

    /// Alarms due at `target_minute`: enabled, not deleted, and either never
    /// sent or last sent before `start_of_today_local` (spec.md 4.1).
    async fn due_alarms(
        &self,
        target_minute: NaiveTime,
        start_of_today_local: DateTime<Utc>,
    ) -> Result<Vec<Alarm>, DbError>;

    /// Advance `last_sent_at` on one alarm. `NotFound` if no row matches.
    async fn mark_sent(&self, alarm_id: i64, ts: DateTime<Utc>) -> Result<(), DbError>;

    /// Lightweight liveness check for the health probe.
    async fn ping(&self) -> Result<(), DbError>;
}

pub struct SqliteAlarmRepository {
    pool: SqlitePool,
}

impl SqliteAlarmRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_alarm(row: AlarmRow) -> Alarm {
        Alarm {
            alarm_id: row.id,
            user_id: row.user_id,
            alarm_minute: row.alarm_time,
            region: row.region,
            enabled: row.enabled != 0,
            last_sent_at: row.last_sent,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlarmRow {
    id: i64,
    user_id: i64,
    alarm_time: NaiveTime,
    region: String,
    enabled: i64,
    last_sent: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const ALARM_COLUMNS: &str =
    "id, user_id, alarm_time, region, enabled, last_sent, deleted_at, created_at, updated_at";

#[async_trait]
impl AlarmRepository for SqliteAlarmRepository {
    async fn create(
        &self,
        user_id: i64,
        alarm_minute: NaiveTime,
        region: &str,
        enabled: bool,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            "INSERT INTO alarms (user_id, alarm_time, region, enabled) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(alarm_minute)
        .bind(region)
        .bind(if enabled { 1 } else { 0 })
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Alarm>, DbError> {
        let rows: Vec<AlarmRow> = sqlx::query_as(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarms WHERE user_id = ? AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_alarm).collect())
    }

    async fn get_by_id(&self, alarm_id: i64) -> Result<Option<Alarm>, DbError> {
        let row: Option<AlarmRow> =
            sqlx::query_as(&format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = ?"))
                .bind(alarm_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Self::row_to_alarm))
    }

    async fn soft_delete(&self, alarm_id: i64) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE alarms SET deleted_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(alarm_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(alarm_id.to_string()));
        }
        Ok(())
    }

    async fn due_alarms(
        &self,
        target_minute: NaiveTime,
        start_of_today_local: DateTime<Utc>,
    ) -> Result<Vec<Alarm>, DbError> {
        let rows: Vec<AlarmRow> = sqlx::query_as(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarms
             WHERE alarm_time = ? AND enabled = 1 AND deleted_at IS NULL
               AND (last_sent IS NULL OR last_sent < ?)"
        ))
        .bind(target_minute)
        .bind(start_of_today_local)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_alarm).collect())
    }

    async fn mark_sent(&self, alarm_id: i64, ts: DateTime<Utc>) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE alarms SET last_sent = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(ts)
        .bind(alarm_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(alarm_id.to_string()));
        }
        Ok(())
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
    use chrono::Timelike;

    async fn setup_test_db() -> SqlitePool {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn minute(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn create_then_list_by_user() {
        let pool = setup_test_db().await;
        let repo = SqliteAlarmRepository::new(pool);

        let id = repo
            .create(1, minute(7, 0), "서울시 강남구", true)
            .await
            .unwrap();

        let alarms = repo.list_by_user(1).await.unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alarm_id, id);
        assert_eq!(alarms[0].alarm_minute.hour(), 7);
    }

    #[tokio::test]
    async fn due_alarms_excludes_disabled_and_deleted_and_already_sent_today() {
        let pool = setup_test_db().await;
        let repo = SqliteAlarmRepository::new(pool);

        let due_id = repo.create(1, minute(7, 0), "Chicago", true).await.unwrap();
        let disabled_id = repo.create(1, minute(7, 0), "Chicago", false).await.unwrap();
        let deleted_id = repo.create(1, minute(7, 0), "Chicago", true).await.unwrap();
        repo.soft_delete(deleted_id).await.unwrap();

        let start_of_today = Utc::now() - chrono::Duration::hours(1);
        let already_sent_id = repo.create(1, minute(7, 0), "Chicago", true).await.unwrap();
        repo.mark_sent(already_sent_id, Utc::now()).await.unwrap();

        let due = repo.due_alarms(minute(7, 0), start_of_today).await.unwrap();
        let due_ids: Vec<i64> = due.iter().map(|a| a.alarm_id).collect();

        assert!(due_ids.contains(&due_id));
        assert!(!due_ids.contains(&disabled_id));
        assert!(!due_ids.contains(&deleted_id));
        assert!(!due_ids.contains(&already_sent_id));
    }

    #[tokio::test]
    async fn due_alarms_includes_alarm_sent_before_start_of_today() {
        let pool = setup_test_db().await;
        let repo = SqliteAlarmRepository::new(pool);

        let id = repo.create(1, minute(7, 0), "Chicago", true).await.unwrap();
        let yesterday = Utc::now() - chrono::Duration::days(1);
        repo.mark_sent(id, yesterday).await.unwrap();

        let start_of_today = Utc::now() - chrono::Duration::hours(1);
        let due = repo.due_alarms(minute(7, 0), start_of_today).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].alarm_id, id);
    }

    #[tokio::test]
    async fn mark_sent_on_vanished_row_is_not_found() {
        let pool = setup_test_db().await;
        let repo = SqliteAlarmRepository::new(pool);

        let result = repo.mark_sent(9999, Utc::now()).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn soft_delete_on_vanished_row_is_not_found() {
        let pool = setup_test_db().await;
        let repo = SqliteAlarmRepository::new(pool);

        let result = repo.soft_delete(9999).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn boundary_minutes_both_selectable() {
        let pool = setup_test_db().await;
        let repo = SqliteAlarmRepository::new(pool);

        repo.create(1, minute(0, 0), "Chicago", true).await.unwrap();
        repo.create(1, NaiveTime::from_hms_opt(23, 59, 59).unwrap(), "Chicago", true)
            .await
            .unwrap();

        let start_of_today = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(
            repo.due_alarms(minute(0, 0), start_of_today).await.unwrap().len(),
            1
        );
        assert_eq!(
            repo.due_alarms(NaiveTime::from_hms_opt(23, 59, 59).unwrap(), start_of_today)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
