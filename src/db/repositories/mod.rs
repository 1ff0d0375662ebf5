//! Database repositories
//!
//! The credential store: users (with their role) and sessions. Every call is
//! bounded by the configured query timeout, and driver failures are reduced to
//! a [`StoreError`] the services can act on.

pub mod session;
pub mod user;

pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};

use std::future::Future;
use std::time::Duration;

use sqlx::{MySqlPool, SqlitePool};
use thiserror::Error;

use crate::db::DynDatabasePool;
use crate::error::ErrorKind;

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("email already registered")]
    DuplicateEmail,

    #[error("username already taken")]
    DuplicateUsername,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound => ErrorKind::NotFound,
            StoreError::DuplicateEmail | StoreError::DuplicateUsername => ErrorKind::Conflict,
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                match duplicate_field(db.message()) {
                    Some(DuplicateField::Email) => return StoreError::DuplicateEmail,
                    Some(DuplicateField::Username) => return StoreError::DuplicateUsername,
                    None => {}
                }
            }
        }

        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            other => StoreError::Internal(other.into()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DuplicateField {
    Email,
    Username,
}

/// Work out which unique key a violation message names.
///
/// SQLite reports `UNIQUE constraint failed: users.email`, MySQL reports
/// `Duplicate entry '...' for key 'users.email'`.
fn duplicate_field(message: &str) -> Option<DuplicateField> {
    let key = message
        .rsplit_once("for key ")
        .or_else(|| message.rsplit_once("failed: "))
        .map(|(_, key)| key)
        .unwrap_or(message);

    if key.contains("username") {
        Some(DuplicateField::Username)
    } else if key.contains("email") {
        Some(DuplicateField::Email)
    } else {
        None
    }
}

/// Run a store call under the query timeout.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "query exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

pub(crate) fn sqlite(pool: &DynDatabasePool) -> Result<&SqlitePool, StoreError> {
    pool.as_sqlite()
        .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("pool has no SQLite backend")))
}

pub(crate) fn mysql(pool: &DynDatabasePool) -> Result<&MySqlPool, StoreError> {
    pool.as_mysql()
        .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("pool has no MySQL backend")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_field_sqlite_messages() {
        assert_eq!(
            duplicate_field("UNIQUE constraint failed: users.email"),
            Some(DuplicateField::Email)
        );
        assert_eq!(
            duplicate_field("UNIQUE constraint failed: users.username"),
            Some(DuplicateField::Username)
        );
        assert_eq!(duplicate_field("UNIQUE constraint failed: roles.title"), None);
    }

    #[test]
    fn test_duplicate_field_mysql_messages() {
        assert_eq!(
            duplicate_field("Duplicate entry 'email@x.io' for key 'users.email'"),
            Some(DuplicateField::Email)
        );
        // the offending value must not decide the field
        assert_eq!(
            duplicate_field("Duplicate entry 'username' for key 'users.email'"),
            Some(DuplicateField::Email)
        );
        assert_eq!(
            duplicate_field("Duplicate entry 'bob' for key 'username'"),
            Some(DuplicateField::Username)
        );
    }

    #[test]
    fn test_sqlx_error_mapping() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert_eq!(
            StoreError::from(sqlx::Error::PoolClosed).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(StoreError::DuplicateUsername.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_bounded_times_out_as_unavailable() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let result: Result<(), StoreError> =
            bounded(Duration::from_secs(1), async { Err(StoreError::NotFound) }).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
