use anyhow::{anyhow, Result};
use authz::{Effect, SecurityAccessRequest, SecurityManager};
use colored::*;
use serde_json::{json, Value};

use super::open_context;
use crate::config::RgateConfig;

/// Builds a request from command-line parts. Each context entry is
/// `key=value`; the value is taken as JSON when it parses (numbers,
/// booleans, quoted strings, arrays) and as a plain string otherwise.
pub fn build_request(
    realm: String,
    principal: String,
    action: String,
    resource: String,
    context: &[String],
) -> Result<SecurityAccessRequest> {
    let mut request = SecurityAccessRequest::new(realm, principal, action, resource);
    for entry in context {
        let (key, value) = parse_attribute(entry)?;
        request = request.with_attribute(key, value);
    }
    Ok(request)
}

fn parse_attribute(entry: &str) -> Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Context entry '{}' is not key=value", entry))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Context entry '{}' has an empty key", entry));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Prints the decision. Any decision, including a deny, is a success.
pub async fn execute(config: &RgateConfig, request: SecurityAccessRequest, format: &str) -> Result<()> {
    let ctx = open_context(config, false).await?;
    let manager = SecurityManager::with_config(ctx, config.security.clone());

    // The store is closed on every path, including a failed check.
    let decision = manager.check(&request).await;
    manager.context().close().await?;
    let effect = decision?;

    match format {
        "json" => {
            let output = json!({
                "realm": request.realm_name,
                "principal": request.principal_name,
                "action": request.action,
                "resource": request.resource,
                "effect": effect,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => println!("{}", colorize(effect)),
    }

    Ok(())
}

fn colorize(effect: Effect) -> ColoredString {
    match effect {
        Effect::Allow => effect.as_str().green().bold(),
        Effect::Deny => effect.as_str().red().bold(),
        Effect::DefaultDeny => effect.as_str().yellow().bold(),
    }
}
