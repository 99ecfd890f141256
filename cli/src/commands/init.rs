use anyhow::Result;
use colored::*;
use database::{initialize_database, verify_schema};
use tracing::info;

use crate::config::RgateConfig;

/// Creates the database file and schema. Running it again is harmless.
pub async fn execute(config: &RgateConfig) -> Result<()> {
    let db = initialize_database(config.database.clone().with_create_tables(true)).await?;

    let missing = verify_schema(&db).await?;
    if !missing.is_empty() {
        anyhow::bail!("Schema is incomplete, missing: {}", missing.join(", "));
    }
    db.close().await;

    info!("Database ready at {}", config.database.database_path.display());
    println!(
        "{} {}",
        "Initialized".green().bold(),
        config.database.database_path.display()
    );
    Ok(())
}
