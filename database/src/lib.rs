//! SQLite persistence for the authorization engine.
//!
//! [`SqliteStore`] implements every `authz` repository trait on top of a
//! normalized schema (see [`init`]). Typical startup:
//!
//! ```rust,no_run
//! use database::{initialize_database, DatabaseConfig, SqliteStore};
//! use authz::{AuthzContext, SecurityManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> database::Result<()> {
//! let db = initialize_database(DatabaseConfig::new()).await?;
//! let ctx = AuthzContext::from_store(Arc::new(SqliteStore::new(db)));
//! let manager = SecurityManager::new(ctx);
//! # Ok(())
//! # }
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

pub mod error;
pub mod init;
pub mod repository;

pub use error::{DatabaseError, Result};
pub use init::{initialize_database, run_migrations, verify_schema, DatabaseConfig, REQUIRED_TABLES};
pub use repository::SqliteStore;

/// Database connection pool
#[derive(Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Opens (creating if missing) the database file at `database_path`.
    pub async fn new(database_path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Connecting to database at: {}", database_path.display());

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        debug!("Database connection established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Check if a table exists
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let query = r#"
            SELECT COUNT(*) as count
            FROM sqlite_master
            WHERE type='table' AND name=?
        "#;

        let result: (i32,) = sqlx::query_as(query)
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0 > 0)
    }

    /// Closes every pooled connection. Safe to call more than once.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Database connection closed");
        }
    }
}
