use anyhow::Result;
use colored::*;
use database::{initialize_database, verify_schema, DatabaseConfig, REQUIRED_TABLES};
use serde_json::{json, Value};

use crate::config::RgateConfig;

/// Execute the health check command
pub async fn execute(config: &RgateConfig, format: &str) -> Result<()> {
    let status = check_system_health(config).await;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => print_health_status_text(&status),
    }

    Ok(())
}

async fn check_system_health(config: &RgateConfig) -> Value {
    let database = check_database_health(&config.database).await;
    let healthy = database["status"] == "healthy";

    json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "database": database,
            "security": {
                "status": "healthy",
                "evaluation_timeout_ms": config.security.evaluation_timeout.as_millis() as u64,
                "decision_strategy": config.security.decision_strategy.to_string(),
            },
        },
    })
}

async fn check_database_health(config: &DatabaseConfig) -> Value {
    let path = config.database_path.display().to_string();

    if !config.database_path.exists() {
        return json!({
            "status": "not_initialized",
            "message": "Database file does not exist yet",
            "path": path,
        });
    }

    let db = match initialize_database(config.clone().with_create_tables(false)).await {
        Ok(db) => db,
        Err(e) => {
            return json!({
                "status": "unhealthy",
                "message": format!("Database exists but cannot be accessed: {}", e),
                "path": path,
            });
        }
    };

    let status = match verify_schema(&db).await {
        Ok(missing) if missing.is_empty() => json!({
            "status": "healthy",
            "message": format!("All {} tables present", REQUIRED_TABLES.len()),
            "path": path,
        }),
        Ok(missing) => json!({
            "status": "unhealthy",
            "message": "Schema is incomplete; run `rgate init`",
            "missing_tables": missing,
            "path": path,
        }),
        Err(e) => json!({
            "status": "unhealthy",
            "message": format!("Failed to inspect schema: {}", e),
            "path": path,
        }),
    };
    db.close().await;
    status
}

fn print_health_status_text(status: &Value) {
    let overall = status["status"].as_str().unwrap_or("unknown");
    let overall_colored = match overall {
        "healthy" => overall.green().bold(),
        "degraded" => overall.yellow().bold(),
        _ => overall.red().bold(),
    };

    println!("System Health: {}", overall_colored);
    println!("Timestamp: {}", status["timestamp"].as_str().unwrap_or(""));
    println!();

    if let Some(components) = status["components"].as_object() {
        for (name, component) in components {
            let state = component["status"].as_str().unwrap_or("unknown");
            let icon = match state {
                "healthy" => "✓".green(),
                "not_initialized" => "○".yellow(),
                _ => "✗".red(),
            };
            println!("  {} {}: {}", icon, name.bold(), state);
            if let Some(message) = component["message"].as_str() {
                println!("      {}", message.dimmed());
            }
            if let Some(path) = component["path"].as_str() {
                println!("      path: {}", path);
            }
        }
    }
}
