// ==============================================================================
// validator.rs - Chunk Upload Validation (API Gateway)
// ==============================================================================
// Description: Validates upload headers and chunk bodies before they reach disk
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// Security: Path-safe upload ids, bounded chunk size, declared-length checks
// ==============================================================================

use axum::http::{header, HeaderMap};
use tracing::debug;
use uuid::Uuid;

use sales_processor::assembler::validate_upload_id;
use sales_processor::range::{parse_content_range, ContentRange};

use crate::handlers::AppError;

pub const UPLOAD_ID_HEADER: &str = "X-Upload-Id";

const MAX_FILENAME_LEN: usize = 255;

pub struct ChunkValidator {
    max_chunk_bytes: u64,
}

impl ChunkValidator {
    pub fn new(max_chunk_bytes: usize) -> Self {
        Self {
            max_chunk_bytes: max_chunk_bytes as u64,
        }
    }

    /// Upload id from `X-Upload-Id`, or a fresh one for a new upload
    pub fn upload_id(&self, headers: &HeaderMap) -> Result<String, AppError> {
        let upload_id = match headers.get(UPLOAD_ID_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| AppError::BadRequest("Invalid X-Upload-Id header".to_string()))?
                .trim()
                .to_string(),
            None => Uuid::new_v4().to_string(),
        };

        validate_upload_id(&upload_id)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(upload_id)
    }

    /// Parsed Content-Range header; absent means the body is the whole file
    pub fn content_range(&self, headers: &HeaderMap) -> Result<Option<ContentRange>, AppError> {
        let raw = match headers.get(header::CONTENT_RANGE) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AppError::BadRequest("Invalid Content-Range header".to_string()))?,
            ),
            None => None,
        };

        let range = parse_content_range(raw).map_err(|e| AppError::InvalidRange(e.to_string()))?;
        if let Some(range) = range {
            if range.len() > self.max_chunk_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "Chunk of {} bytes exceeds limit of {} bytes",
                    range.len(),
                    self.max_chunk_bytes
                )));
            }
        }
        debug!("Content range parsed: {:?}", range);
        Ok(range)
    }

    /// Called as body bytes arrive; stops oversized bodies early
    pub fn check_received(&self, received: u64, range: Option<&ContentRange>) -> Result<(), AppError> {
        if received > self.max_chunk_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Chunk exceeds limit of {} bytes",
                self.max_chunk_bytes
            )));
        }
        if let Some(range) = range {
            if received > range.len() {
                return Err(AppError::BadRequest(format!(
                    "Chunk body exceeds declared range of {} bytes",
                    range.len()
                )));
            }
        }
        Ok(())
    }

    /// Declared file name of the multipart file field
    pub fn file_name(&self, name: Option<&str>) -> Result<String, AppError> {
        let name = name.map(str::trim).unwrap_or("");
        if name.is_empty() {
            return Err(AppError::BadRequest("Missing file name".to_string()));
        }
        if name.chars().count() > MAX_FILENAME_LEN {
            return Err(AppError::BadRequest("File name too long".to_string()));
        }
        if name.chars().any(char::is_control) {
            return Err(AppError::BadRequest("Invalid characters in file name".to_string()));
        }
        Ok(name.to_string())
    }
}
