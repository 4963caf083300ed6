// ==============================================================================
// runner.rs - Job Runner
// ==============================================================================
// Description: Claims jobs, runs the handler, applies retry/backoff policy
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AggregationError, StoreError};
use crate::models::{CompletionEvent, JobOutcome, JobPayload};
use crate::notifier::CompletionSink;
use crate::queue::{Delivery, JobQueue};

/// Attempt ceiling and exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the next attempt after `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Processes one job payload
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobPayload) -> Result<JobOutcome, AggregationError>;
}

/// What a single `run_once` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was ready
    Idle,
    Completed { job_id: Uuid, notified: bool },
    Retrying { job_id: Uuid, attempt: u32, delay: Duration },
    Failed { job_id: Uuid, attempts: u32 },
}

pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    notifier: Arc<dyn CompletionSink>,
    policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        notifier: Arc<dyn CompletionSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            handler,
            notifier,
            policy,
        }
    }

    /// Claim and process at most one job
    pub async fn run_once(&self) -> Result<RunOutcome, StoreError> {
        let Some(delivery) = self.queue.claim().await? else {
            return Ok(RunOutcome::Idle);
        };

        let job_id = delivery.job.id;
        let attempt = delivery.job.attempts_made + 1;
        info!(
            "Processing job {} (upload {}, attempt {}/{})",
            job_id, delivery.job.payload.upload_id, attempt, self.policy.max_attempts
        );

        match self.handler.handle(&delivery.job.payload).await {
            Ok(outcome) => {
                self.queue.ack(&delivery).await?;
                info!(
                    "Job {} completed: {} groups written to {:?}",
                    job_id, outcome.groups, outcome.output_path
                );
                let notified = self.notify_owner(&delivery).await;
                Ok(RunOutcome::Completed { job_id, notified })
            }
            Err(e) => self.handle_failure(&delivery, attempt, &e).await,
        }
    }

    async fn handle_failure(
        &self,
        delivery: &Delivery,
        attempt: u32,
        err: &AggregationError,
    ) -> Result<RunOutcome, StoreError> {
        let job_id = delivery.job.id;
        let message = err.to_string();

        if attempt >= self.policy.max_attempts {
            error!("Job {} failed permanently after {} attempts: {}", job_id, attempt, message);
            self.queue.fail(delivery, &message).await?;
            return Ok(RunOutcome::Failed { job_id, attempts: attempt });
        }

        let delay = self.policy.delay_after(attempt);
        warn!(
            "Job {} attempt {} failed: {} (retrying in {:?})",
            job_id, attempt, message, delay
        );
        self.queue.retry_later(delivery, delay, &message).await?;
        Ok(RunOutcome::Retrying { job_id, attempt, delay })
    }

    async fn notify_owner(&self, delivery: &Delivery) -> bool {
        let payload = &delivery.job.payload;
        let event = CompletionEvent {
            file_name: payload.input_file_name(),
            result_name: payload.result_name.clone(),
        };

        match self.notifier.notify(&payload.file.owner_id, &event).await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!("Failed to notify user {}: {}", payload.file.owner_id, e);
                false
            }
        }
    }

    /// Poll the queue until `shutdown` flips to true.
    ///
    /// A job already being handled is finished before the loop exits.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let pause = match self.run_once().await {
                Ok(RunOutcome::Idle) => Duration::from_secs(1),
                Ok(_) => continue,
                Err(e) => {
                    error!("Queue error: {}", e);
                    Duration::from_secs(5)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
