//! Database layer
//!
//! Persistence for users, roles and sessions on either SQLite (default) or
//! MySQL. The backend is picked from configuration and hidden behind
//! [`DatabasePool`]; repositories dispatch on the driver.
//!
//! ```ignore
//! let pool = create_pool(&config.database).await?;
//! migrations::run_migrations(&pool).await?;
//! let users = SqlxUserRepository::boxed(pool.clone(), config.database.query_timeout());
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
