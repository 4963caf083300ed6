// ==============================================================================
// error.rs - Error Taxonomy
// ==============================================================================
// Description: Error types for uploads, backing stores and aggregation jobs
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use thiserror::Error;

use crate::range::RangeParseError;

/// Failures of the external collaborators (Redis, PostgreSQL)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// Errors surfaced to the uploading client
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid Content-Range header: {0}")]
    RangeParse(#[from] RangeParseError),

    #[error("Range mismatch: expected start {expected_start}, got {requested_start}")]
    RangeMismatch { expected_start: u64, requested_start: u64 },

    #[error("Previous chunks missing for upload {upload_id}")]
    MissingPredecessor { upload_id: String },

    #[error("Chunk size mismatch: range declares {declared} bytes, received {actual}")]
    ChunkSizeMismatch { declared: u64, actual: u64 },

    #[error("Declared total {declared} differs from {recorded} recorded for this upload")]
    TotalMismatch { recorded: u64, declared: u64 },

    #[error("Upload {upload_id} belongs to another user")]
    OwnerMismatch { upload_id: String },

    #[error("Invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Progress store error: {0}")]
    Progress(#[source] StoreError),

    #[error("Job queue error: {0}")]
    Queue(#[source] StoreError),

    #[error("File record error: {0}")]
    Records(#[source] StoreError),
}

impl UploadError {
    /// True for errors caused by the request itself rather than the server
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            UploadError::Storage(_)
                | UploadError::Progress(_)
                | UploadError::Queue(_)
                | UploadError::Records(_)
        )
    }
}

/// Errors raised while running an aggregation job
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File record error: {0}")]
    Records(#[from] StoreError),

    #[error("Aggregation task failed: {0}")]
    Task(String),
}
