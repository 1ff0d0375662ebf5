//! User repository
//!
//! Users and the role table they reference.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use super::{bounded, mysql, sqlite, StoreError};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::User;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user and return its id.
    ///
    /// Fails with `DuplicateEmail` or `DuplicateUsername` when either unique
    /// key is already taken.
    async fn create(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        role_id: i64,
    ) -> Result<i64, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<User, StoreError>;

    /// Number of known roles
    async fn count_roles(&self) -> Result<u32, StoreError>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
    timeout: Duration,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool, timeout: Duration) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool, timeout))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        role_id: i64,
    ) -> Result<i64, StoreError> {
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    create_user_sqlite(sqlite(&self.pool)?, email, username, password_hash, role_id)
                        .await
                }
                DatabaseDriver::Mysql => {
                    create_user_mysql(mysql(&self.pool)?, email, username, password_hash, role_id)
                        .await
                }
            }
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError> {
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => find_user_by_email_sqlite(sqlite(&self.pool)?, email).await,
                DatabaseDriver::Mysql => find_user_by_email_mysql(mysql(&self.pool)?, email).await,
            }
        })
        .await
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StoreError> {
        bounded(self.timeout, async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => find_user_by_id_sqlite(sqlite(&self.pool)?, id).await,
                DatabaseDriver::Mysql => find_user_by_id_mysql(mysql(&self.pool)?, id).await,
            }
        })
        .await
    }

    async fn count_roles(&self) -> Result<u32, StoreError> {
        bounded(self.timeout, async {
            let count = match self.pool.driver() {
                DatabaseDriver::Sqlite => count_roles_sqlite(sqlite(&self.pool)?).await?,
                DatabaseDriver::Mysql => count_roles_mysql(mysql(&self.pool)?).await?,
            };
            u32::try_from(count)
                .map_err(|_| StoreError::Internal(anyhow::anyhow!("invalid role count: {}", count)))
        })
        .await
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(
    pool: &SqlitePool,
    email: &str,
    username: &str,
    password_hash: &str,
    role_id: i64,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, username, password_hash, role_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(email)
    .bind(username)
    .bind(password_hash)
    .bind(role_id)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn find_user_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, email, username, password_hash, role_id, created_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row_to_user_sqlite(&row)
}

async fn find_user_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, email, username, password_hash, role_id, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row_to_user_sqlite(&row)
}

async fn count_roles_sqlite(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM roles")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("count")?)
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        role_id: row.try_get("role_id")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(
    pool: &MySqlPool,
    email: &str,
    username: &str,
    password_hash: &str,
    role_id: i64,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, username, password_hash, role_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(email)
    .bind(username)
    .bind(password_hash)
    .bind(role_id)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.last_insert_id() as i64)
}

async fn find_user_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, email, username, password_hash, role_id, created_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row_to_user_mysql(&row)
}

async fn find_user_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, email, username, password_hash, role_id, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row_to_user_mysql(&row)
}

async fn count_roles_mysql(pool: &MySqlPool) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM roles")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("count")?)
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        role_id: row.try_get("role_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxUserRepository::new(pool.clone(), Duration::from_secs(5));
        (pool, repo)
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let (_pool, repo) = setup_test_repo().await;

        let id = repo
            .create("ada@example.com", "ada", "hash", 1)
            .await
            .expect("Failed to create user");
        assert!(id > 0);

        let by_email = repo.find_by_email("ada@example.com").await.unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.username, "ada");
        assert_eq!(by_email.password_hash, "hash");
        assert_eq!(by_email.role_id, 1);

        let by_id = repo.find_by_id(id).await.unwrap();
        assert_eq!(by_id.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_find_user_not_found() {
        let (_pool, repo) = setup_test_repo().await;

        assert!(matches!(
            repo.find_by_email("nobody@example.com").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(repo.find_by_id(999).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_duplicate_email_is_distinguished() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create("ada@example.com", "ada", "hash", 1).await.unwrap();

        let result = repo.create("ada@example.com", "other", "hash", 1).await;
        assert!(matches!(result, Err(StoreError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_duplicate_username_is_distinguished() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create("ada@example.com", "ada", "hash", 1).await.unwrap();

        let result = repo.create("other@example.com", "ada", "hash", 1).await;
        assert!(matches!(result, Err(StoreError::DuplicateUsername)));
    }

    #[tokio::test]
    async fn test_count_roles() {
        let (_pool, repo) = setup_test_repo().await;
        assert_eq!(repo.count_roles().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let (pool, repo) = setup_test_repo().await;
        pool.close().await;

        let result = repo.find_by_id(1).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
