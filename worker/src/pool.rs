// ==============================================================================
// pool.rs - Worker Pool
// ==============================================================================
// Description: Runs several job runners against one queue until shutdown
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use sales_processor::JobRunner;

pub struct WorkerPool {
    runner: Arc<JobRunner>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(runner: JobRunner, concurrency: usize) -> Self {
        Self {
            runner: Arc::new(runner),
            concurrency: concurrency.max(1),
        }
    }

    /// Run `concurrency` runner loops; returns once all of them observed shutdown
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        for slot in 0..self.concurrency {
            let runner = self.runner.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                info!("Runner {} started", slot);
                runner.run_until(shutdown).await;
                info!("Runner {} stopped", slot);
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Runner task panicked: {}", e);
            }
        }
    }
}
