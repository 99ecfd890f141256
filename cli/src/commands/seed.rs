use anyhow::{Context, Result};
use authz::Fixture;
use colored::*;
use std::path::Path;

use super::open_context;
use crate::config::RgateConfig;

/// Applies a fixture file, creating the schema first if needed.
pub async fn execute(config: &RgateConfig, file: &Path) -> Result<()> {
    let fixture = Fixture::from_path(file)
        .with_context(|| format!("Failed to load fixture {}", file.display()))?;

    let ctx = open_context(config, true).await?;
    let summary = fixture
        .apply(&ctx)
        .await
        .with_context(|| format!("Failed to apply fixture {}", file.display()))?;
    ctx.close().await?;

    println!("{} {}", "Seeded".green().bold(), file.display());
    println!("  realms:     {}", summary.realms);
    println!("  claims:     {}", summary.claims);
    println!("  roles:      {}", summary.roles);
    println!("  principals: {}", summary.principals);
    Ok(())
}
