pub mod check;
pub mod health;
pub mod incr;
pub mod init;
pub mod seed;

use anyhow::{Context, Result};
use authz::AuthzContext;
use database::{initialize_database, SqliteStore};
use std::sync::Arc;

use crate::config::RgateConfig;

/// Opens the configured database behind an [`AuthzContext`].
///
/// Commands other than `init` and `seed` expect the schema to exist already.
pub async fn open_context(config: &RgateConfig, create_tables: bool) -> Result<AuthzContext> {
    let path = &config.database.database_path;
    if !create_tables && !path.exists() {
        anyhow::bail!(
            "Database not found at {}; run `rgate init` first",
            path.display()
        );
    }

    let db = initialize_database(config.database.clone().with_create_tables(create_tables))
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(AuthzContext::from_store(Arc::new(SqliteStore::new(db))))
}
