//! Session repository
//!
//! Persisted refresh grants. A session row links one user to its current
//! access/refresh token pair; deleting the row revokes both.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL

use super::{bounded, mysql, sqlite, StoreError};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new session and return its id
    async fn create(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<String, StoreError>;

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Session, StoreError>;

    /// Id of the session currently holding `access_token` for `user_id`
    async fn session_id_for_access_token(
        &self,
        user_id: i64,
        access_token: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Whether a session still holds `access_token` for `user_id`.
    ///
    /// Absence is `Ok(false)`, never an error.
    async fn exists_for_access_token(
        &self,
        user_id: i64,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .session_id_for_access_token(user_id, access_token)
            .await?
            .is_some())
    }

    /// Overwrite both tokens of a session. `NotFound` if the row is gone.
    async fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), StoreError>;

    /// Delete a session. Deleting a missing session succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
    timeout: Duration,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool, timeout: Duration) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool, timeout))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    create_session_sqlite(sqlite(&self.pool)?, &id, user_id, access_token, refresh_token)
                        .await?
                }
                DatabaseDriver::Mysql => {
                    create_session_mysql(mysql(&self.pool)?, &id, user_id, access_token, refresh_token)
                        .await?
                }
            }
            Ok(())
        })
        .await?;
        Ok(id)
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Session, StoreError> {
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    find_by_refresh_token_sqlite(sqlite(&self.pool)?, refresh_token).await
                }
                DatabaseDriver::Mysql => {
                    find_by_refresh_token_mysql(mysql(&self.pool)?, refresh_token).await
                }
            }
        })
        .await
    }

    async fn session_id_for_access_token(
        &self,
        user_id: i64,
        access_token: &str,
    ) -> Result<Option<String>, StoreError> {
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    session_id_for_access_token_sqlite(sqlite(&self.pool)?, user_id, access_token)
                        .await
                }
                DatabaseDriver::Mysql => {
                    session_id_for_access_token_mysql(mysql(&self.pool)?, user_id, access_token)
                        .await
                }
            }
        })
        .await
    }

    async fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), StoreError> {
        let affected = bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    update_tokens_sqlite(sqlite(&self.pool)?, id, access_token, refresh_token).await
                }
                DatabaseDriver::Mysql => {
                    update_tokens_mysql(mysql(&self.pool)?, id, access_token, refresh_token).await
                }
            }
        })
        .await?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => delete_session_sqlite(sqlite(&self.pool)?, id).await,
                DatabaseDriver::Mysql => delete_session_mysql(mysql(&self.pool)?, id).await,
            }
        })
        .await
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(
    pool: &SqlitePool,
    id: &str,
    user_id: i64,
    access_token: &str,
    refresh_token: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, access_token, refresh_token, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

async fn find_by_refresh_token_sqlite(
    pool: &SqlitePool,
    refresh_token: &str,
) -> Result<Session, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, access_token, refresh_token, created_at
        FROM sessions
        WHERE refresh_token = ?
        "#,
    )
    .bind(refresh_token)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row_to_session_sqlite(&row)
}

async fn session_id_for_access_token_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    access_token: &str,
) -> Result<Option<String>, StoreError> {
    let row = sqlx::query("SELECT id FROM sessions WHERE user_id = ? AND access_token = ? LIMIT 1")
        .bind(user_id)
        .bind(access_token)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("id")?)),
        None => Ok(None),
    }
}

async fn update_tokens_sqlite(
    pool: &SqlitePool,
    id: &str,
    access_token: &str,
    refresh_token: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET access_token = ?, refresh_token = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn delete_session_sqlite(pool: &SqlitePool, id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(
    pool: &MySqlPool,
    id: &str,
    user_id: i64,
    access_token: &str,
    refresh_token: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, access_token, refresh_token, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

async fn find_by_refresh_token_mysql(
    pool: &MySqlPool,
    refresh_token: &str,
) -> Result<Session, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, access_token, refresh_token, created_at
        FROM sessions
        WHERE refresh_token = ?
        "#,
    )
    .bind(refresh_token)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row_to_session_mysql(&row)
}

async fn session_id_for_access_token_mysql(
    pool: &MySqlPool,
    user_id: i64,
    access_token: &str,
) -> Result<Option<String>, StoreError> {
    let row = sqlx::query("SELECT id FROM sessions WHERE user_id = ? AND access_token = ? LIMIT 1")
        .bind(user_id)
        .bind(access_token)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("id")?)),
        None => Ok(None),
    }
}

async fn update_tokens_mysql(
    pool: &MySqlPool,
    id: &str,
    access_token: &str,
    refresh_token: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET access_token = ?, refresh_token = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn delete_session_mysql(pool: &MySqlPool, id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxSessionRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxSessionRepository::new(pool.clone(), Duration::from_secs(5));
        (pool, repo)
    }

    // Sessions reference users, so a user row must exist first
    async fn create_test_user(pool: &DynDatabasePool, id: i64) {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, password_hash, role_id)
            VALUES (?, ?, ?, 'hash', 1)
            "#,
        )
        .bind(id)
        .bind(format!("user{}@example.com", id))
        .bind(format!("user{}", id))
        .execute(pool.as_sqlite().unwrap())
        .await
        .expect("Failed to create test user");
    }

    #[tokio::test]
    async fn test_create_and_find_by_refresh_token() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let id = repo.create(1, "access-a", "refresh-a").await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let session = repo.find_by_refresh_token("refresh-a").await.unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.user_id, 1);
        assert_eq!(session.access_token, "access-a");
    }

    #[tokio::test]
    async fn test_find_by_refresh_token_not_found() {
        let (_pool, repo) = setup_test_repo().await;
        let result = repo.find_by_refresh_token("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_exists_for_access_token() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;
        create_test_user(&pool, 2).await;
        let id = repo.create(1, "access-a", "refresh-a").await.unwrap();

        assert!(repo.exists_for_access_token(1, "access-a").await.unwrap());
        assert_eq!(
            repo.session_id_for_access_token(1, "access-a").await.unwrap(),
            Some(id)
        );
        // same token, wrong user
        assert!(!repo.exists_for_access_token(2, "access-a").await.unwrap());
        assert!(!repo.exists_for_access_token(1, "access-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_tokens_rotates_pair() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;
        let id = repo.create(1, "access-a", "refresh-a").await.unwrap();

        repo.update_tokens(&id, "access-b", "refresh-b").await.unwrap();

        assert!(!repo.exists_for_access_token(1, "access-a").await.unwrap());
        assert!(repo.exists_for_access_token(1, "access-b").await.unwrap());
        assert!(matches!(
            repo.find_by_refresh_token("refresh-a").await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(repo.find_by_refresh_token("refresh-b").await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_update_missing_session_is_not_found() {
        let (_pool, repo) = setup_test_repo().await;
        let result = repo.update_tokens("missing", "a", "r").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;
        let id = repo.create(1, "access-a", "refresh-a").await.unwrap();

        repo.delete(&id).await.unwrap();
        assert!(!repo.exists_for_access_token(1, "access-a").await.unwrap());

        repo.delete(&id).await.expect("Second delete should succeed");
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let (pool, repo) = setup_test_repo().await;
        pool.close().await;

        let result = repo.exists_for_access_token(1, "access-a").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
