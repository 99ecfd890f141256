use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

mod commands;
mod config;
mod logging;
mod utils;

use commands::{check, health, incr, init, seed};
use config::RgateConfig;
use utils::env_paths::EnvPaths;

/// rgate - multi-tenant role-based access control
#[derive(Parser)]
#[command(name = "rgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML configuration file (defaults to config/rgate.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overriding configuration and environment
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Load realms, roles and principals from a YAML or JSON fixture
    Seed {
        /// Fixture file (.yaml, .yml or .json)
        file: PathBuf,
    },

    /// Decide whether a principal may perform an action on a resource
    Check {
        #[arg(long)]
        realm: String,

        #[arg(long)]
        principal: String,

        #[arg(long)]
        action: String,

        #[arg(long)]
        resource: String,

        /// Request attribute as key=value; values are read as JSON when possible
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Consume one unit of a principal's limit
    Incr {
        #[arg(long)]
        realm: String,

        #[arg(long)]
        principal: String,

        #[arg(long)]
        resource: String,

        /// Limit type; defaults to the principal's limit on the resource
        #[arg(long)]
        limit_type: Option<String>,
    },

    /// Check database reachability and schema
    Health {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = EnvPaths::load()?;
    let mut config = RgateConfig::load(cli.config.as_deref(), &paths)?;
    if let Some(database) = cli.database {
        config.database.database_path = database;
    }

    let _guard = logging::init_logging(cli.verbose, config.log_dir.as_deref())?;

    match cli.command {
        Commands::Init => init::execute(&config).await,
        Commands::Seed { file } => seed::execute(&config, &file).await,
        Commands::Check {
            realm,
            principal,
            action,
            resource,
            context,
            format,
        } => {
            let request = check::build_request(realm, principal, action, resource, &context)?;
            check::execute(&config, request, &format).await
        }
        Commands::Incr {
            realm,
            principal,
            resource,
            limit_type,
        } => incr::execute(&config, &realm, &principal, &resource, limit_type).await,
        Commands::Health { format } => health::execute(&config, &format).await,
    }
}
