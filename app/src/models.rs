// ==============================================================================
// models.rs - Upload, Progress, Job and File Record Models
// ==============================================================================
// Description: Data structures shared by the gateway, worker and processor
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Status of an in-flight upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Completed,
    /// Last write failed; cleared when the next chunk re-reads the file
    Error,
}

/// Per-upload assembly state held by the chunk assembler
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_id: String,
    /// User that claimed the upload id, loaded from the owner marker on restart
    pub owner_id: Option<String>,
    /// Declared total from the first range seen for this upload
    pub total: Option<u64>,
    /// Bytes durably written to `target_path`
    pub received_bytes: u64,
    /// Highest `loaded` value published to the progress store
    pub reported_bytes: u64,
    pub status: UploadStatus,
    pub target_path: PathBuf,
    /// Job submitted for the terminal transition, if any
    pub job_id: Option<Uuid>,
    pub last_activity: tokio::time::Instant,
}

impl UploadSession {
    pub fn new(upload_id: impl Into<String>, target_path: PathBuf) -> Self {
        Self {
            upload_id: upload_id.into(),
            owner_id: None,
            total: None,
            received_bytes: 0,
            reported_bytes: 0,
            status: UploadStatus::Uploading,
            target_path,
            job_id: None,
            last_activity: tokio::time::Instant::now(),
        }
    }
}

/// Progress status visible to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Uploading,
    Completed,
}

/// Progress record stored under `upload:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Percentage 0-100, rounded from loaded/total
    pub progress: u8,
    pub loaded: u64,
    pub total: u64,
    pub filename: Option<String>,
    pub status: ProgressStatus,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ProgressRecord {
    pub fn uploading(loaded: u64, total: u64, filename: Option<String>) -> Self {
        Self {
            progress: percent(loaded, total),
            loaded,
            total,
            filename,
            status: ProgressStatus::Uploading,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn completed(total: u64, filename: Option<String>) -> Self {
        Self {
            progress: 100,
            loaded: total,
            total,
            filename,
            status: ProgressStatus::Completed,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Round `loaded / total` to a whole percentage, halves rounding up.
pub fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let loaded = loaded.min(total) as u128;
    let total = total as u128;
    ((loaded * 200 + total) / (total * 2)) as u8
}

/// Status of a persisted file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processing,
    Completed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            _ => None,
        }
    }
}

/// Durable record of an uploaded file and its aggregation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub upload_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub original_name: String,
    pub path: String,
    pub size: u64,
    pub status: FileStatus,
    /// Set only once the aggregation output exists
    pub result_name: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Metadata about the uploaded file carried through the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub owner_id: String,
    /// Sanitized name used on disk
    pub file_name: String,
    /// Name as declared by the client
    pub original_name: String,
    pub size: u64,
    pub result_name: String,
}

/// Aggregation job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: Uuid,
    pub upload_id: String,
    pub file: FileMetadata,
    pub input_path: String,
    pub output_path: String,
    pub result_name: String,
}

impl JobPayload {
    /// File name shown to the user in the completion event
    pub fn input_file_name(&self) -> String {
        PathBuf::from(&self.input_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file.file_name.clone())
    }
}

/// Result name for the aggregation output of an upload
pub fn result_name_for(upload_id: &str) -> String {
    format!("{}-aggregated_sales.csv", upload_id)
}

/// Terminal status returned by the job handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Done,
}

/// Successful handler result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub output_path: PathBuf,
    /// Number of distinct groups written
    pub groups: usize,
}

/// Event pushed to the owner's live connection when a job finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub file_name: String,
    pub result_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0, 100), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 200), 1); // 0.5% rounds up
        assert_eq!(percent(100, 100), 100);
        assert_eq!(percent(150, 100), 100);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(u64::MAX - 1, u64::MAX), 100);
    }

    #[test]
    fn test_file_status_str() {
        assert_eq!(FileStatus::Processing.as_str(), "processing");
        assert_eq!(FileStatus::parse("completed"), Some(FileStatus::Completed));
        assert_eq!(FileStatus::parse("failed"), None);
    }

    #[test]
    fn test_completion_event_wire_format() {
        let event = CompletionEvent {
            file_name: "abc".to_string(),
            result_name: "abc-aggregated_sales.csv".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["fileName"], "abc");
        assert_eq!(json["resultName"], "abc-aggregated_sales.csv");
    }

    #[test]
    fn test_progress_record_serializes_lowercase_status() {
        let record = ProgressRecord::uploading(50, 200, Some("sales.csv".to_string()));
        assert_eq!(record.progress, 25);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "uploading");
        assert_eq!(json["loaded"], 50);
    }
}
