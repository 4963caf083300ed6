// ==============================================================================
// records.rs - File Record Persistence
// ==============================================================================
// Description: PostgreSQL-backed FileRecords for uploaded files and results
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{FileRecord, FileStatus, JobPayload};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file_records (
    id            UUID PRIMARY KEY,
    upload_id     TEXT NOT NULL UNIQUE,
    owner_id      TEXT NOT NULL,
    file_name     TEXT NOT NULL,
    original_name TEXT NOT NULL,
    path          TEXT NOT NULL,
    size          BIGINT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'processing',
    result_name   TEXT,
    uploaded_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at  TIMESTAMPTZ
)
"#;

const RESULT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_file_records_owner_result ON file_records (owner_id, result_name)";

const SELECT_COLUMNS: &str = "id, upload_id, owner_id, file_name, original_name, path, size, \
     status, result_name, uploaded_at, completed_at";

type FileRecordRow = (
    Uuid,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn record_from_row(row: FileRecordRow) -> Result<FileRecord, StoreError> {
    let (id, upload_id, owner_id, file_name, original_name, path, size, status, result_name, uploaded_at, completed_at) =
        row;
    let status = FileStatus::parse(&status)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown file status '{}'", status)))?;
    Ok(FileRecord {
        id,
        upload_id,
        owner_id,
        file_name,
        original_name,
        path,
        size: size.max(0) as u64,
        status,
        result_name,
        uploaded_at,
        completed_at,
    })
}

/// Durable FileRecord operations used by the aggregation worker and the
/// download endpoint
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Create the record in `processing`, or refresh path/size of an existing
    /// one. Never changes the status of an existing record.
    async fn create_file_record(&self, job: &JobPayload) -> Result<FileRecord, StoreError>;

    async fn update_file_record_status(
        &self,
        upload_id: &str,
        status: FileStatus,
        result_name: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn get(&self, upload_id: &str) -> Result<Option<FileRecord>, StoreError>;

    /// Completed record for a result file, restricted to its owner
    async fn find_by_result(&self, owner_id: &str, result_name: &str) -> Result<Option<FileRecord>, StoreError>;

    /// All records owned by `owner_id`, newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// PostgreSQL implementation
#[derive(Clone)]
pub struct PgFileRecordStore {
    pool: PgPool,
}

impl PgFileRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and index if missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(RESULT_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRecordStore for PgFileRecordStore {
    async fn create_file_record(&self, job: &JobPayload) -> Result<FileRecord, StoreError> {
        let query = format!(
            "INSERT INTO file_records (id, upload_id, owner_id, file_name, original_name, path, size, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'processing') \
             ON CONFLICT (upload_id) DO UPDATE SET path = EXCLUDED.path, size = EXCLUDED.size \
             RETURNING {}",
            SELECT_COLUMNS
        );

        let row: FileRecordRow = sqlx::query_as(&query)
            .bind(Uuid::new_v4())
            .bind(&job.upload_id)
            .bind(&job.file.owner_id)
            .bind(&job.file.file_name)
            .bind(&job.file.original_name)
            .bind(job.input_file_name())
            .bind(job.file.size as i64)
            .fetch_one(&self.pool)
            .await?;

        record_from_row(row)
    }

    async fn update_file_record_status(
        &self,
        upload_id: &str,
        status: FileStatus,
        result_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let completed_at = (status == FileStatus::Completed).then(Utc::now);

        let result = sqlx::query(
            "UPDATE file_records \
             SET status = $2, result_name = COALESCE($3, result_name), \
                 completed_at = COALESCE($4, completed_at) \
             WHERE upload_id = $1",
        )
        .bind(upload_id)
        .bind(status.as_str())
        .bind(result_name)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(upload_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let query = format!("SELECT {} FROM file_records WHERE upload_id = $1", SELECT_COLUMNS);
        let row: Option<FileRecordRow> = sqlx::query_as(&query)
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(record_from_row).transpose()
    }

    async fn find_by_result(&self, owner_id: &str, result_name: &str) -> Result<Option<FileRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM file_records \
             WHERE owner_id = $1 AND result_name = $2 AND status = 'completed'",
            SELECT_COLUMNS
        );
        let row: Option<FileRecordRow> = sqlx::query_as(&query)
            .bind(owner_id)
            .bind(result_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(record_from_row).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM file_records WHERE owner_id = $1 ORDER BY uploaded_at DESC",
            SELECT_COLUMNS
        );
        let rows: Vec<FileRecordRow> = sqlx::query_as(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryFileRecordStore {
    state: Mutex<MemoryRecordState>,
}

#[derive(Default)]
struct MemoryRecordState {
    records: HashMap<String, FileRecord>,
    history: Vec<(String, FileStatus)>,
}

impl MemoryFileRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status transitions applied so far, oldest first
    pub fn history(&self, upload_id: &str) -> Vec<FileStatus> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .history
            .iter()
            .filter(|(id, _)| id == upload_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl FileRecordStore for MemoryFileRecordStore {
    async fn create_file_record(&self, job: &JobPayload) -> Result<FileRecord, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = state.records.get_mut(&job.upload_id) {
            existing.path = job.input_file_name();
            existing.size = job.file.size;
            return Ok(existing.clone());
        }

        let record = FileRecord {
            id: Uuid::new_v4(),
            upload_id: job.upload_id.clone(),
            owner_id: job.file.owner_id.clone(),
            file_name: job.file.file_name.clone(),
            original_name: job.file.original_name.clone(),
            path: job.input_file_name(),
            size: job.file.size,
            status: FileStatus::Processing,
            result_name: None,
            uploaded_at: Utc::now(),
            completed_at: None,
        };
        state.records.insert(job.upload_id.clone(), record.clone());
        state.history.push((job.upload_id.clone(), FileStatus::Processing));
        Ok(record)
    }

    async fn update_file_record_status(
        &self,
        upload_id: &str,
        status: FileStatus,
        result_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let record = state
            .records
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NotFound(upload_id.to_string()))?;

        record.status = status;
        if let Some(name) = result_name {
            record.result_name = Some(name.to_string());
        }
        if status == FileStatus::Completed && record.completed_at.is_none() {
            record.completed_at = Some(Utc::now());
        }
        state.history.push((upload_id.to_string(), status));
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.records.get(upload_id).cloned())
    }

    async fn find_by_result(&self, owner_id: &str, result_name: &str) -> Result<Option<FileRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .records
            .values()
            .find(|r| {
                r.owner_id == owner_id
                    && r.status == FileStatus::Completed
                    && r.result_name.as_deref() == Some(result_name)
            })
            .cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<FileRecord> = state
            .records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
