// ==============================================================================
// models.rs - API Data Models
// ==============================================================================
// Description: Request/response models for the upload API
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use sales_processor::{ChunkOutcome, ChunkStatus};
use serde::Serialize;

/// Chunk upload response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub upload_id: String,
    pub filename: String,
    /// Canonical file name under the storage root
    pub path: String,
    pub received: u64,
    pub total: u64,
    pub next_expected_start: u64,
    pub is_complete: bool,
    pub status: ChunkStatus,
}

impl UploadResponse {
    pub fn from_outcome(outcome: &ChunkOutcome, filename: String) -> Self {
        let message = match outcome.status {
            ChunkStatus::UploadComplete => "File upload completed",
            ChunkStatus::FirstChunkStored | ChunkStatus::ChunkAppended => "Chunk accepted",
        };

        Self {
            message,
            upload_id: outcome.upload_id.clone(),
            filename,
            path: outcome
                .canonical_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            received: outcome.received_bytes,
            total: outcome.total,
            next_expected_start: outcome.next_expected_start(),
            is_complete: outcome.is_complete,
            status: outcome.status,
        }
    }
}

/// Body of a 416 response so the client can resume from the right offset
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeMismatchResponse {
    pub error: &'static str,
    pub expected_start: u64,
    pub current_file_size: u64,
    pub requested_start: u64,
}

/// Frame sent over the notifications websocket
#[derive(Debug, Serialize)]
pub struct EventFrame<T: Serialize> {
    pub event: &'static str,
    pub data: T,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub redis: bool,
    pub storage: bool,
}

/// API information response
#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
