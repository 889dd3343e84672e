use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oct_adapters::{DeliveryChannel, MailerConfig, WebhookMailer};
use oct_storage::{CatalogStore, PgCatalogStore};
use oct_sync::{build_scheduler, spawn_startup_cycle, SyncConfig, SyncPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "oct")]
#[command(about = "Outlet catalog tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync cycle and exit.
    Sync,
    /// Run the startup cycle, then keep syncing on the cron cadence.
    Daemon,
    /// Apply database migrations.
    Migrate,
    /// Print recent run history.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = build_pipeline(&config).await?;
            let summary = pipeline.run_once().await;
            println!(
                "sync {}: total={} new={} removed={} failed_pages={} notified={}",
                summary.run.status.as_str(),
                summary.run.total_products,
                summary.run.new_products,
                summary.run.removed_products,
                summary.failed_pages,
                summary.notified_subscribers
            );
        }
        Commands::Daemon => {
            let pipeline = Arc::new(build_pipeline(&config).await?);
            spawn_startup_cycle(
                pipeline.clone(),
                Duration::from_secs(config.startup_delay_secs),
            );
            if config.scheduler_enabled {
                let mut sched = build_scheduler(pipeline.clone(), &config).await?;
                sched.start().await.context("starting scheduler")?;
            }
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
        }
        Commands::Migrate => {
            let store = PgCatalogStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Runs { limit } => {
            let store = PgCatalogStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            for run in store.recent_runs(limit).await? {
                println!(
                    "{} {} total={} new={} removed={}{}",
                    run.started_at.to_rfc3339(),
                    run.status.as_str(),
                    run.total_products,
                    run.new_products,
                    run.removed_products,
                    run.error
                        .as_deref()
                        .map(|e| format!(" error={e}"))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

async fn build_pipeline(config: &SyncConfig) -> Result<SyncPipeline> {
    let store = PgCatalogStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let channel: Option<Arc<dyn DeliveryChannel>> = match MailerConfig::from_env() {
        Some(mailer) => Some(Arc::new(
            WebhookMailer::new(mailer).context("building delivery client")?,
        )),
        None => None,
    };
    SyncPipeline::from_config(config, Arc::new(store), channel)
}
