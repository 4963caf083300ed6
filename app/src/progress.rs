// ==============================================================================
// progress.rs - Upload Progress Store
// ==============================================================================
// Description: TTL-backed progress records keyed `upload:<id>`
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::models::{percent, ProgressRecord};
use crate::range::ContentRange;

/// Redis key for an upload's progress record
pub fn progress_key(upload_id: &str) -> String {
    format!("upload:{}", upload_id)
}

/// Key/value store for progress records.
///
/// Every `put` replaces the whole record and restarts its TTL.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn put(&self, upload_id: &str, record: &ProgressRecord) -> Result<(), StoreError>;

    async fn get(&self, upload_id: &str) -> Result<Option<ProgressRecord>, StoreError>;
}

/// Redis-backed progress store (SETEX with JSON payload)
#[derive(Clone)]
pub struct RedisProgressStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisProgressStore {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn put(&self, upload_id: &str, record: &ProgressRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(progress_key(upload_id), payload, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(progress_key(upload_id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// In-process progress store with the same expiry semantics
pub struct MemoryProgressStore {
    ttl: Duration,
    state: Mutex<MemoryProgressState>,
}

#[derive(Default)]
struct MemoryProgressState {
    entries: HashMap<String, (ProgressRecord, Instant)>,
    history: Vec<(String, ProgressRecord)>,
}

impl MemoryProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(MemoryProgressState::default()),
        }
    }

    /// Every record written for an upload, oldest first
    pub fn history(&self, upload_id: &str) -> Vec<ProgressRecord> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .history
            .iter()
            .filter(|(id, _)| id == upload_id)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600))
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn put(&self, upload_id: &str, record: &ProgressRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let expires_at = Instant::now() + self.ttl;
        state
            .entries
            .insert(upload_id.to_string(), (record.clone(), expires_at));
        state.history.push((upload_id.to_string(), record.clone()));
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.entries.get(upload_id) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                state.entries.remove(upload_id);
                Ok(None)
            }
            Some((record, _)) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }
}

/// Folds over an incoming body stream and yields a progress record each time
/// the whole-number percentage advances.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    filename: Option<String>,
    base: u64,
    total: Option<u64>,
    seen: u64,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    /// `expected_len` is used as the total for whole-file requests
    pub fn new(range: Option<ContentRange>, expected_len: Option<u64>, filename: Option<String>) -> Self {
        let (base, total) = match range {
            Some(range) => (range.start, Some(range.total)),
            None => (0, expected_len),
        };
        Self {
            filename,
            base,
            total,
            seen: 0,
            last_percent: None,
        }
    }

    /// Bytes observed so far, including everything before this chunk
    pub fn loaded(&self) -> u64 {
        match self.total {
            Some(total) => (self.base + self.seen).min(total),
            None => self.base + self.seen,
        }
    }

    /// Record `received` more bytes. Returns a record to publish, if any.
    pub fn observe(&mut self, received: usize) -> Option<ProgressRecord> {
        self.seen += received as u64;
        let total = self.total?;
        let loaded = self.loaded();
        let pct = percent(loaded, total);
        if self.last_percent.is_some_and(|last| pct <= last) {
            return None;
        }
        self.last_percent = Some(pct);
        Some(ProgressRecord::uploading(loaded, total, self.filename.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressStatus;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expires_after_ttl() {
        let store = MemoryProgressStore::new(Duration::from_secs(60));
        let record = ProgressRecord::uploading(10, 100, Some("sales.csv".to_string()));
        store.put("abc", &record).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(record));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("abc").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_whole_record_and_refreshes_ttl() {
        let store = MemoryProgressStore::new(Duration::from_secs(60));
        store
            .put("abc", &ProgressRecord::uploading(10, 100, Some("a.csv".to_string())))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        let second = ProgressRecord::completed(100, None);
        store.put("abc", &second).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        let stored = store.get("abc").await.unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(stored.filename, None);
    }

    #[test]
    fn test_progress_key() {
        assert_eq!(progress_key("1234"), "upload:1234");
    }

    #[test]
    fn test_tracker_emits_on_percentage_change_only() {
        let range = ContentRange { start: 100, end: 199, total: 200 };
        let mut tracker = ProgressTracker::new(Some(range), None, Some("s.csv".to_string()));

        let first = tracker.observe(1).unwrap();
        assert_eq!(first.loaded, 101);
        assert_eq!(first.progress, 51);
        assert_eq!(first.status, ProgressStatus::Uploading);

        // 101 -> 101.5 bytes worth of percent: 51% still
        assert!(tracker.observe(0).is_none());

        let next = tracker.observe(99).unwrap();
        assert_eq!(next.loaded, 200);
        assert_eq!(next.progress, 100);
    }

    #[test]
    fn test_tracker_loaded_is_monotonic() {
        let mut tracker = ProgressTracker::new(None, Some(1000), None);
        let mut last = 0;
        for _ in 0..50 {
            if let Some(record) = tracker.observe(37) {
                assert!(record.loaded >= last);
                last = record.loaded;
            }
        }
        assert_eq!(tracker.loaded(), 1000);
    }

    #[test]
    fn test_tracker_without_total_stays_silent() {
        let mut tracker = ProgressTracker::new(None, None, None);
        assert!(tracker.observe(512).is_none());
        assert_eq!(tracker.loaded(), 512);
    }
}
