#![allow(dead_code)]

mod alarm_repo;
mod device_token_repo;
mod store;

pub use alarm_repo::{AlarmRepository, SqliteAlarmRepository};
pub use device_token_repo::{DeviceTokenRepository, SqliteDeviceTokenRepository};
pub use store::{AlarmStore, InMemoryAlarmStore, SqliteAlarmStore};

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("no row matches id {0}")]
    NotFound(String),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound(_) => ErrorKind::NotFound,
            DbError::Migration(_) => ErrorKind::Fatal,
            DbError::Sqlx(sqlx::Error::Database(_)) | DbError::Sqlx(sqlx::Error::ColumnNotFound(_)) => {
                ErrorKind::Fatal
            }
            DbError::Sqlx(_) => ErrorKind::Transient,
        }
    }
}

/// SQLite connection configuration.
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/scheduler.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Create and configure a SQLite connection pool.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool, DbError> {
    if let Some(db_path) = config.url.strip_prefix("sqlite:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DbError::Migration(format!("failed to create database directory: {e}"))
                })?;
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&format!("{}?mode=rwc", config.url))
        .await?;

    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
    let migration_001 = include_str!("../../migrations/001_create_alarms_and_tokens.sql");
    sqlx::raw_sql(migration_001).execute(pool).await?;

    tracing::info!("database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_and_migrations_succeed_against_in_memory_db() {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let pool = create_pool(&config).await.expect("failed to create pool");
        run_migrations(&pool).await.expect("failed to run migrations");
    }
}
