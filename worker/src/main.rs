// ==============================================================================
// main.rs - Sales Worker Process
// ==============================================================================
// Description: Background worker that aggregates uploaded sales files from the
//              Redis job queue and publishes completion events
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sales_processor::notifier::RedisCompletionPublisher;
use sales_processor::queue::{JobQueue, RedisJobQueue, AGGREGATE_SALES};
use sales_processor::records::{FileRecordStore, PgFileRecordStore};
use sales_processor::{AggregationWorker, JobRunner, Settings};

mod pool;

use pool::WorkerPool;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Starting Sales Worker v1.0.0");

    let settings = Settings::from_env().context("Failed to load settings")?;

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(settings.require_database_url()?)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let records = PgFileRecordStore::new(db_pool);
    records
        .ensure_schema()
        .await
        .context("Failed to create file_records table")?;
    info!("Connected to PostgreSQL");

    let redis_client = RedisClient::open(settings.redis_url.as_str())
        .context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to create Redis connection manager")?;
    info!("Connected to Redis");

    settings
        .storage_layout()
        .ensure()
        .await
        .context("Failed to prepare storage directories")?;

    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis_conn.clone(), AGGREGATE_SALES));
    let records: Arc<dyn FileRecordStore> = Arc::new(records);

    // Jobs left active by a crashed worker go back to the wait list
    match queue.recover_active().await {
        Ok(0) => {}
        Ok(n) => warn!("Recovered {} jobs left active by a previous worker", n),
        Err(e) => error!("Failed to recover active jobs: {}", e),
    }

    let runner = JobRunner::new(
        queue.clone(),
        Arc::new(AggregationWorker::new(records)),
        Arc::new(RedisCompletionPublisher::new(redis_conn)),
        settings.retry_policy,
    );
    let pool = WorkerPool::new(runner, settings.worker_concurrency);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(log_queue_stats(queue, shutdown_rx.clone()));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested, finishing in-flight jobs");
        let _ = shutdown_tx.send(true);
    });

    info!(
        "Worker ready with {} runners, waiting for jobs...",
        settings.worker_concurrency
    );
    pool.run(shutdown_rx).await;

    info!("Worker stopped");
    Ok(())
}

/// Periodic queue depth report
async fn log_queue_stats(queue: Arc<dyn JobQueue>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => match queue.counts().await {
                Ok(counts) => info!(
                    "Queue: {} waiting, {} active, {} delayed, {} failed",
                    counts.waiting, counts.active, counts.delayed, counts.failed
                ),
                Err(e) => warn!("Failed to read queue counts: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
