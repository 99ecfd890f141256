use crate::{Database, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Tables the repositories depend on.
pub const REQUIRED_TABLES: &[&str] = &[
    "realms",
    "claims",
    "roles",
    "role_claims",
    "role_parents",
    "principals",
    "principal_claims",
    "principal_roles",
    "limits",
];

/// Database initialization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to create tables on initialization
    pub create_tables: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data").join("rgate.db"),
            max_connections: 5,
            create_tables: true,
        }
    }
}

impl DatabaseConfig {
    /// Create a new database configuration with default paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom database path
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set whether to create tables on initialization
    pub fn with_create_tables(mut self, create: bool) -> Self {
        self.create_tables = create;
        self
    }
}

/// Initialize the database with the given configuration
pub async fn initialize_database(config: DatabaseConfig) -> Result<Arc<Database>> {
    info!(
        "Initializing database at {}",
        config.database_path.display()
    );

    let db = Database::new(&config.database_path, config.max_connections).await?;

    if config.create_tables {
        run_migrations(&db).await?;
    }

    Ok(Arc::new(db))
}

/// Creates the schema. Every statement is idempotent.
///
/// Claims store an absent condition as `''` so that the
/// `(realm, action, resource, condition)` uniqueness key also covers
/// unconditional claims. The `position` columns keep set insertion order.
pub async fn run_migrations(db: &Database) -> Result<()> {
    info!("Running database migrations");

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS realms (
            id TEXT PRIMARY KEY,
            realm_name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS claims (
            id TEXT PRIMARY KEY,
            realm TEXT NOT NULL REFERENCES realms(realm_name),
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            condition TEXT NOT NULL DEFAULT '',
            effect TEXT NOT NULL DEFAULT 'allow',
            start_date TEXT,
            end_date TEXT,
            UNIQUE (realm, action, resource, condition)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            realm TEXT NOT NULL REFERENCES realms(realm_name),
            role_name TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            UNIQUE (realm, role_name)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS role_claims (
            role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            claim_id TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (role_id, claim_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS role_parents (
            role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            parent_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (role_id, parent_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS principals (
            id TEXT PRIMARY KEY,
            realm TEXT NOT NULL REFERENCES realms(realm_name),
            principal_name TEXT NOT NULL,
            properties TEXT NOT NULL DEFAULT '{}',
            UNIQUE (realm, principal_name)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS principal_claims (
            principal_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            claim_id TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (principal_id, claim_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS principal_roles (
            principal_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (principal_id, role_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS limits (
            id TEXT PRIMARY KEY,
            principal_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            limit_type TEXT NOT NULL,
            resource TEXT NOT NULL,
            max_allowed INTEGER NOT NULL,
            value INTEGER NOT NULL DEFAULT 0,
            expiration_date TEXT NOT NULL,
            position INTEGER NOT NULL,
            UNIQUE (principal_id, limit_type, resource)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_role_parents_parent ON role_parents(parent_id)",
        "CREATE INDEX IF NOT EXISTS idx_principal_roles_role ON principal_roles(role_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(db.pool()).await?;
    }

    info!("Database migrations completed");
    Ok(())
}

/// Returns the names of required tables that are missing.
pub async fn verify_schema(db: &Database) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        if !db.table_exists(table).await? {
            warn!("Missing table: {}", table);
            missing.push(table.to_string());
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let config = DatabaseConfig::new().with_database_path(db_path.clone());
        let db = initialize_database(config).await.unwrap();

        assert!(db_path.exists());
        assert!(verify_schema(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_tables() {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new()
            .with_database_path(temp_dir.path().join("bare.db"))
            .with_create_tables(false);

        let db = initialize_database(config).await.unwrap();
        assert_eq!(verify_schema(&db).await.unwrap().len(), REQUIRED_TABLES.len());

        run_migrations(&db).await.unwrap();
        run_migrations(&db).await.unwrap();
        assert!(verify_schema(&db).await.unwrap().is_empty());
    }

    #[test]
    fn test_config_from_yaml() {
        let config: DatabaseConfig =
            serde_yaml::from_str("database_path: /tmp/x.db\nmax_connections: 2\n").unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.max_connections, 2);
        assert!(config.create_tables);
    }
}
