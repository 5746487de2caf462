use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pricewatch_storage::PgProductStore;
use pricewatch_worker::{JobQueue, RedisJobQueue, Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pricewatch")]
#[command(about = "Price comparison scrape worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scrape worker until SIGINT/SIGTERM.
    Worker,
    /// Push one scrape job onto the queue, for local smoke testing.
    Enqueue {
        query: String,
        /// Retailer to route to; fans out to all retailers when omitted.
        #[arg(long)]
        retailer: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command.unwrap_or(Commands::Worker) {
        Commands::Worker => run_worker(config).await,
        Commands::Enqueue { query, retailer } => enqueue_job(config, &query, retailer).await,
    }
}

async fn run_worker(config: WorkerConfig) -> Result<()> {
    let queue = RedisJobQueue::connect(&config.redis_url, &config.queue_name)
        .await
        .context("connecting to job queue")?;
    let store = PgProductStore::connect(&config.database_url)
        .await
        .context("connecting to product store")?;
    let registry = pricewatch_strategies::default_registry()?;

    Worker::new(Box::new(queue), Arc::new(store), Arc::new(registry), config)
        .run_until_shutdown()
        .await
}

async fn enqueue_job(config: WorkerConfig, query: &str, retailer: Option<String>) -> Result<()> {
    let payload = match retailer {
        Some(retailer) => serde_json::json!({ "retailer": retailer, "query": query }),
        None => serde_json::json!({ "query": query }),
    };

    let mut queue = RedisJobQueue::connect(&config.redis_url, &config.queue_name)
        .await
        .context("connecting to job queue")?;
    queue.enqueue(&payload.to_string()).await?;
    println!("enqueued on {}: {payload}", config.queue_name);
    Ok(())
}
