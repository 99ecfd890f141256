use anyhow::{anyhow, Result};
use colored::*;
use tracing::info;

use super::open_context;
use crate::config::RgateConfig;

/// Consumes one unit of a limit and prints the new `value/maxAllowed`.
///
/// Without `--limit-type` the principal's first limit on the resource is
/// used, falling back to the configured quota limit type.
pub async fn execute(
    config: &RgateConfig,
    realm: &str,
    principal_name: &str,
    resource: &str,
    limit_type: Option<String>,
) -> Result<()> {
    let ctx = open_context(config, false).await?;

    let principal = ctx
        .principals
        .find_by_name(realm, principal_name)
        .await?
        .ok_or_else(|| anyhow!("Principal '{}' not found in realm '{}'", principal_name, realm))?;

    let limit_type = limit_type
        .or_else(|| {
            principal
                .find_limit(None, resource)
                .map(|limit| limit.limit_type.clone())
        })
        .unwrap_or_else(|| config.security.quota_limit_type.clone());

    let limit = ctx
        .principals
        .increment(&principal, &limit_type, resource)
        .await?;
    ctx.close().await?;

    info!(
        "Incremented {} limit on {} for {}/{}",
        limit_type, resource, realm, principal_name
    );
    println!(
        "{} {} {}/{}",
        limit.limit_type.cyan(),
        limit.resource,
        limit.value,
        limit.max_allowed
    );
    Ok(())
}
