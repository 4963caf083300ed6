// ==============================================================================
// main.rs - Sales Processor CLI
// ==============================================================================
// Description: Offline aggregation and job queue inspection
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sales_processor::aggregate::aggregate_file;
use sales_processor::queue::{JobQueue, RedisJobQueue, AGGREGATE_SALES};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate a headerless sales CSV into a per-department report
    Aggregate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// List jobs that exhausted their retries
    FailedJobs {
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },

    /// Print queue depths
    QueueStats {
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sales_processor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Aggregate { input, output } => {
            let aggregate = tokio::task::spawn_blocking({
                let input = input.clone();
                let output = output.clone();
                move || aggregate_file(&input, &output)
            })
            .await
            .context("Aggregation task panicked")??;

            info!("Wrote {} departments to {:?}", aggregate.len(), output);
        }
        Command::FailedJobs { redis_url } => {
            let queue = connect_queue(&redis_url).await?;
            let failed = queue.failed().await?;
            if failed.is_empty() {
                println!("No failed jobs");
            }
            for job in failed {
                println!(
                    "{}  upload={}  attempts={}  error={}",
                    job.id,
                    job.payload.upload_id,
                    job.attempts_made,
                    job.last_error.as_deref().unwrap_or("-")
                );
            }
        }
        Command::QueueStats { redis_url } => {
            let queue = connect_queue(&redis_url).await?;
            let counts = queue.counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}

async fn connect_queue(redis_url: &str) -> Result<RedisJobQueue> {
    let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    Ok(RedisJobQueue::new(conn, AGGREGATE_SALES))
}
