//! quarry - schema migration commands
//!
//! - `migrate:create <name>` writes a new timestamped script
//! - `migrate:run` applies pending scripts in order
//! - `migrate:status` lists applied and pending scripts

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quarry_core::AppConfig;
use quarry_db::{create_migration, Database, MigrationStatus, MigrationTracker};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quarry", author, version, about = "Database migrations for Quarry")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,

    /// Log every statement sent to the database
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Create a new migration script
    #[command(name = "migrate:create")]
    Create {
        /// Short description, used in the filename
        name: String,
    },
    /// Apply all pending migrations
    #[command(name = "migrate:run")]
    Run,
    /// Show applied and pending migrations
    #[command(name = "migrate:status")]
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Create { name } => {
            let path = create_migration(&config.migrations, &name)
                .await
                .context("Failed to create migration")?;
            println!("Created {}", path.display());
        }
        Commands::Run => {
            let db = connect(&config).await?;
            let tracker = MigrationTracker::new(db.clone(), config.migrations.clone());
            let result = tracker.run().await;
            db.close().await;

            let applied = result.context("Migration run failed")?;
            if applied.is_empty() {
                println!("Nothing to migrate");
            }
            for name in applied {
                println!("Applied {}", name);
            }
        }
        Commands::Status => {
            let db = connect(&config).await?;
            let tracker = MigrationTracker::new(db.clone(), config.migrations.clone());
            let result = tracker.status().await;
            db.close().await;

            let status = result.context("Failed to read migration status")?;
            print!("{}", format_status(&status));
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,quarry_db=debug"
    } else {
        "warn,quarry_db=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn connect(config: &AppConfig) -> Result<Arc<Database>> {
    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    db.ping().await.context("Database did not answer a ping")?;
    info!("Connected to database");
    Ok(Arc::new(db))
}

fn format_status(status: &MigrationStatus) -> String {
    if status.applied.is_empty() && status.pending.is_empty() {
        return "No migrations found\n".to_string();
    }

    let mut out = format!("Applied ({}):\n", status.applied.len());
    for record in &status.applied {
        match record.executed_at {
            Some(at) => out.push_str(&format!(
                "  [x] {}  {}\n",
                record.name,
                at.format("%Y-%m-%d %H:%M:%S")
            )),
            None => out.push_str(&format!("  [x] {}\n", record.name)),
        }
    }
    out.push_str(&format!("Pending ({}):\n", status.pending.len()));
    for file in &status.pending {
        out.push_str(&format!("  [ ] {}\n", file.name));
    }
    out
}
