//! Mercato catalog tag index maintenance.
//!
//! Exposes the cron entry points and the installer as CLI subcommands;
//! scheduling is left to the host environment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mercato_tags::config::Config;
use mercato_tags::cron::Crons;
use mercato_tags::{db, install};

#[derive(Parser)]
#[command(name = "mercato", about = "Mercato catalog tag index maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create all tables and register a project with its languages.
    Install {
        /// Project name (defaults to DEFAULT_PROJECT).
        #[arg(long)]
        project: Option<String>,

        /// Languages to enable (repeatable; defaults to "en").
        #[arg(long = "language")]
        languages: Vec<String>,
    },

    /// Rebuild the full tag index from every active product.
    CreateCache,

    /// Generate attribute tags, incrementally or for explicit products.
    GenerateTags {
        /// Restrict the run to these product ids (repeatable).
        #[arg(long = "product-id")]
        product_ids: Vec<i64>,
    },

    /// Strip stale generated tags from products without attribute fields.
    Cleanup,

    /// Check database connectivity.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let pool = db::create_pool(&config).await?;

    match cli.command {
        Command::Install { project, languages } => {
            let project = project.unwrap_or_else(|| config.default_project.clone());
            let languages = if languages.is_empty() {
                vec!["en".to_string()]
            } else {
                languages
            };

            install::install(&pool, &project, &languages).await?;
        }
        Command::CreateCache => {
            let crons = Crons::for_default_project(pool).await?;
            crons.create_cache().await?;
        }
        Command::GenerateTags { product_ids } => {
            let crons = Crons::for_default_project(pool).await?;
            let ids = if product_ids.is_empty() {
                None
            } else {
                Some(product_ids)
            };
            crons.generate_attribute_tags(ids).await?;
        }
        Command::Cleanup => {
            let crons = Crons::for_default_project(pool).await?;
            let count = crons.cleanup().await?;
            info!(products = count, "cleanup finished");
        }
        Command::Health => {
            if db::check_health(&pool).await {
                info!("database connection healthy");
            } else {
                anyhow::bail!("database connection failed");
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
