// ==============================================================================
// queue.rs - Durable Job Queue
// ==============================================================================
// Description: Redis-backed job queue with delayed retries and a failed list
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Layout (per queue name):
//   <prefix>:wait     LIST  ready jobs, LPUSH in / LMOVE out from the right
//   <prefix>:active   LIST  jobs claimed by a worker
//   <prefix>:delayed  ZSET  jobs waiting for their backoff, scored by ready-ms
//   <prefix>:failed   LIST  jobs that exhausted their attempts
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::JobPayload;

/// Queue name for sales aggregation jobs
pub const AGGREGATE_SALES: &str = "aggregate-sales";

const KEY_PREFIX: &str = "sales:queue";

// Move every delayed job whose ready time has passed back onto the wait list
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, job in ipairs(due) do
    redis.call('ZREM', KEYS[1], job)
    redis.call('LPUSH', KEYS[2], job)
end
return #due
"#;

/// Job envelope stored in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub kind: String,
    /// Attempts already made (0 for a fresh job)
    pub attempts_made: u32,
    pub payload: JobPayload,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(kind: &str, payload: JobPayload) -> Self {
        Self {
            id: payload.job_id,
            kind: kind.to_string(),
            attempts_made: 0,
            payload,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }
}

/// A claimed job plus the handle needed to acknowledge it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: QueuedJob,
    pub receipt: String,
}

/// Queue depth snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub failed: usize,
}

/// At-least-once job queue.
///
/// A claimed job stays in the active set until it is acknowledged, scheduled
/// for retry or moved to the failed list.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: QueuedJob) -> Result<Uuid, StoreError>;

    /// Claim the next ready job without blocking
    async fn claim(&self) -> Result<Option<Delivery>, StoreError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), StoreError>;

    async fn retry_later(&self, delivery: &Delivery, delay: Duration, error: &str) -> Result<(), StoreError>;

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), StoreError>;

    /// Requeue jobs left active by a crashed worker. Returns how many moved.
    async fn recover_active(&self) -> Result<usize, StoreError>;

    async fn failed(&self) -> Result<Vec<QueuedJob>, StoreError>;

    async fn counts(&self) -> Result<QueueCounts, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis implementation
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    wait_key: String,
    active_key: String,
    delayed_key: String,
    failed_key: String,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, name: &str) -> Self {
        let prefix = format!("{}:{}", KEY_PREFIX, name);
        Self {
            conn,
            wait_key: format!("{}:wait", prefix),
            active_key: format!("{}:active", prefix),
            delayed_key: format!("{}:delayed", prefix),
            failed_key: format!("{}:failed", prefix),
        }
    }

    async fn promote_due(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let moved: usize = redis::Script::new(PROMOTE_DUE_SCRIPT)
            .key(&self.delayed_key)
            .key(&self.wait_key)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<Uuid, StoreError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.wait_key, payload).await?;
        Ok(job.id)
    }

    async fn claim(&self) -> Result<Option<Delivery>, StoreError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .lmove(&self.wait_key, &self.active_key, Direction::Right, Direction::Left)
            .await?;

        match raw {
            Some(receipt) => {
                let job: QueuedJob = serde_json::from_str(&receipt)?;
                Ok(Some(Delivery { job, receipt }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lrem(&self.active_key, 1, &delivery.receipt).await?;
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration, error: &str) -> Result<(), StoreError> {
        let mut job = delivery.job.clone();
        job.attempts_made += 1;
        job.last_error = Some(error.to_string());
        let payload = serde_json::to_string(&job)?;
        let ready_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.active_key, 1, &delivery.receipt)
            .ignore()
            .zadd(&self.delayed_key, payload, ready_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), StoreError> {
        let mut job = delivery.job.clone();
        job.attempts_made += 1;
        job.last_error = Some(error.to_string());
        let payload = serde_json::to_string(&job)?;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.active_key, 1, &delivery.receipt)
            .ignore()
            .lpush(&self.failed_key, payload)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover_active(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        loop {
            let raw: Option<String> = conn
                .lmove(&self.active_key, &self.wait_key, Direction::Right, Direction::Right)
                .await?;
            match raw {
                Some(_) => moved += 1,
                None => break,
            }
        }
        Ok(moved)
    }

    async fn failed(&self) -> Result<Vec<QueuedJob>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&self.failed_key, 0, -1).await?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let mut conn = self.conn.clone();
        let (waiting, active, delayed, failed): (usize, usize, usize, usize) = redis::pipe()
            .llen(&self.wait_key)
            .llen(&self.active_key)
            .zcard(&self.delayed_key)
            .llen(&self.failed_key)
            .query_async(&mut conn)
            .await?;
        Ok(QueueCounts { waiting, active, delayed, failed })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process queue with the same state machine, used by tests and the
/// single-process demo mode
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<MemoryQueueState>,
}

#[derive(Default)]
struct MemoryQueueState {
    wait: VecDeque<QueuedJob>,
    active: HashMap<String, QueuedJob>,
    delayed: Vec<(Instant, QueuedJob)>,
    failed: Vec<QueuedJob>,
    enqueued: usize,
    retry_delays: Vec<Duration>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `enqueue` calls
    pub fn enqueued_count(&self) -> usize {
        self.lock().enqueued
    }

    /// Backoff delays requested so far, in order
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.lock().retry_delays.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<Uuid, StoreError> {
        let mut state = self.lock();
        state.enqueued += 1;
        let id = job.id;
        state.wait.push_back(job);
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<Delivery>, StoreError> {
        let mut state = self.lock();
        let now = Instant::now();

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        state.delayed = pending;
        state.wait.extend(due.into_iter().map(|(_, job)| job));

        match state.wait.pop_front() {
            Some(job) => {
                let receipt = format!("{}:{}", job.id, job.attempts_made);
                state.active.insert(receipt.clone(), job.clone());
                Ok(Some(Delivery { job, receipt }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), StoreError> {
        self.lock().active.remove(&delivery.receipt);
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration, error: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.active.remove(&delivery.receipt);
        let mut job = delivery.job.clone();
        job.attempts_made += 1;
        job.last_error = Some(error.to_string());
        state.retry_delays.push(delay);
        state.delayed.push((Instant::now() + delay, job));
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.active.remove(&delivery.receipt);
        let mut job = delivery.job.clone();
        job.attempts_made += 1;
        job.last_error = Some(error.to_string());
        state.failed.push(job);
        Ok(())
    }

    async fn recover_active(&self) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let recovered: Vec<QueuedJob> = state.active.drain().map(|(_, job)| job).collect();
        let moved = recovered.len();
        state.wait.extend(recovered);
        Ok(moved)
    }

    async fn failed(&self) -> Result<Vec<QueuedJob>, StoreError> {
        Ok(self.lock().failed.clone())
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let state = self.lock();
        Ok(QueueCounts {
            waiting: state.wait.len(),
            active: state.active.len(),
            delayed: state.delayed.len(),
            failed: state.failed.len(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
