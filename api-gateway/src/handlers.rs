// ==============================================================================
// handlers.rs - API Request Handlers
// ==============================================================================
// Description: HTTP request handlers for chunked uploads, results and notifications
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, Path, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::stream::StreamExt;
use futures_util::sink::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use sales_processor::models::{FileRecord, ProgressRecord};
use sales_processor::notifier::{LiveConnection, PROCESS_COMPLETED};
use sales_processor::progress::ProgressTracker;
use sales_processor::{ChunkRequest, StoreError, UploadError};

use crate::{
    middleware::AuthUser,
    models::*,
    state::AppState,
    validator::ChunkValidator,
};

/// Multipart field carrying the chunk bytes
const FILE_FIELD: &str = "file";

/// Root endpoint - API information
pub async fn root() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "Sales Upload API Gateway",
        version: "1.0.0",
        endpoints: vec![
            "/health - Health check",
            "/ready - Readiness check",
            "/api/upload - Upload a file or one chunk of it (POST)",
            "/api/files - List your uploaded files (GET)",
            "/api/files/{result_name} - Download an aggregation result (GET)",
            "/api/uploads/{upload_id}/progress - Upload progress (GET)",
            "/api/notifications/ws - WebSocket completion events",
        ],
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        version: "1.0.0",
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.records().ping().await.is_ok();
    let redis = state.queue().ping().await.is_ok();
    let storage = tokio::fs::metadata(state.layout().root())
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let ready = database && redis && storage;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            redis,
            storage,
        }),
    )
}

/// Accept a whole file or one `Content-Range` chunk of it
///
/// The chunk is admitted before its body is read. The `file` field is then
/// streamed into a staging file while progress is published, and handed to
/// the assembler. Responds `200` once the upload is
/// complete and `202` while more chunks are expected.
pub async fn upload_chunk(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let validator = ChunkValidator::new(state.settings().max_chunk_bytes);
    let upload_id = validator.upload_id(&headers)?;
    let range = validator.content_range(&headers)?;
    state.assembler().admit(&upload_id, &owner_id, range).await?;

    // Whole-file requests only know the request length, multipart framing included
    let expected_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let filename = validator.file_name(field.file_name())?;
        let (mut file, staged) = state.assembler().stage_file()?;
        let mut tracker = ProgressTracker::new(range, expected_len, Some(filename.clone()));
        let mut received: u64 = 0;

        while let Some(bytes) = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload body: {}", e)))?
        {
            received += bytes.len() as u64;
            validator.check_received(received, range.as_ref())?;

            file.write_all(&bytes)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to write staging file: {}", e)))?;

            if let Some(record) = tracker.observe(bytes.len()) {
                if let Err(e) = state
                    .assembler()
                    .record_progress(&upload_id, &owner_id, &record)
                    .await
                {
                    warn!("Failed to record progress for upload {}: {}", upload_id, e);
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to flush staging file: {}", e)))?;
        drop(file);

        info!(
            "Received {} bytes for upload {} ({:?}) from {}",
            received, upload_id, range, owner_id
        );

        let outcome = state
            .assembler()
            .accept(ChunkRequest {
                upload_id,
                owner_id,
                original_name: filename.clone(),
                range,
                staged,
            })
            .await?;

        let status = if outcome.is_complete {
            StatusCode::OK
        } else {
            StatusCode::ACCEPTED
        };
        return Ok((status, Json(UploadResponse::from_outcome(&outcome, filename))).into_response());
    }

    Err(AppError::BadRequest("No file uploaded".to_string()))
}

/// Progress of an upload owned by the caller
pub async fn get_progress(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(upload_id): Path<String>,
) -> Result<Json<ProgressRecord>, AppError> {
    let owner = state.assembler().owner_of(&upload_id).await?;
    if owner.as_deref() != Some(user_id.as_str()) {
        return Err(AppError::NotFound);
    }

    state
        .assembler()
        .get_progress(&upload_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// The caller's uploaded files, newest first
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let records = state.records().list_by_owner(&owner_id).await?;
    Ok(Json(records))
}

/// Stream an aggregation result owned by the caller
pub async fn download_result(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(result_name): Path<String>,
) -> Result<Response, AppError> {
    let record = state
        .records()
        .find_by_result(&owner_id, &result_name)
        .await?
        .ok_or(AppError::NotFound)?;

    let path = state.layout().result_path(&result_name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Result {} recorded for upload {} but missing on disk", result_name, record.upload_id);
            return Err(AppError::NotFound);
        }
        Err(e) => return Err(AppError::Internal(format!("Failed to open result: {}", e))),
    };
    let file_size = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat result: {}", e)))?
        .len();

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", result_name))
            .map_err(|e| AppError::Internal(format!("Invalid result name header: {}", e)))?,
    );

    info!("Serving result {} to {} ({} bytes)", result_name, owner_id, file_size);

    let body = axum::body::Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

/// Live completion events for the caller
pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_notification_socket(socket, state, user_id))
}

async fn handle_notification_socket(socket: WebSocket, state: AppState, user_id: String) {
    let LiveConnection { id, mut events } = state.notifier().connect(&user_id);
    info!("WebSocket connected for user {}", user_id);

    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => {
                // Channel closes when a newer connection replaces this one
                let Some(event) = event else {
                    debug!("Connection {} for user {} superseded", id, user_id);
                    break;
                };
                let frame = EventFrame { event: PROCESS_COMPLETED, data: event };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize completion event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.notifier().disconnect(&user_id, id);
    info!("WebSocket disconnected for user {}", user_id);
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound,
    BadRequest(String),
    PayloadTooLarge(String),
    /// Unparseable Content-Range
    InvalidRange(String),
    RangeMismatch {
        expected_start: u64,
        requested_start: u64,
    },
    MissingPredecessor,
    Internal(String),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::RangeParse(e) => AppError::InvalidRange(e.to_string()),
            UploadError::RangeMismatch {
                expected_start,
                requested_start,
            } => AppError::RangeMismatch {
                expected_start,
                requested_start,
            },
            UploadError::MissingPredecessor { .. } => AppError::MissingPredecessor,
            // Another user's upload id is reported as if it didn't exist
            UploadError::OwnerMismatch { .. } => AppError::NotFound,
            e @ (UploadError::ChunkSizeMismatch { .. }
            | UploadError::TotalMismatch { .. }
            | UploadError::InvalidUploadId(_)) => AppError::BadRequest(e.to_string()),
            e => AppError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound,
            e => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::RangeMismatch {
                expected_start,
                requested_start,
            } => {
                let body = RangeMismatchResponse {
                    error: "Range mismatch",
                    expected_start,
                    current_file_size: expected_start,
                    requested_start,
                };
                return (StatusCode::RANGE_NOT_SATISFIABLE, Json(body)).into_response();
            }
            AppError::MissingPredecessor => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Previous chunks missing")
                    .with_message("Cannot append chunk because the target file doesn't exist"),
            ),
            AppError::NotFound => (StatusCode::NOT_FOUND, ErrorResponse::new("Resource not found")),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, ErrorResponse::new(msg)),
            AppError::InvalidRange(msg) => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                ErrorResponse::new("Invalid Content-Range").with_message(msg),
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new("Internal server error"))
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_processor::range::RangeParseError;

    #[test]
    fn test_upload_errors_map_to_status_codes() {
        let cases: Vec<(UploadError, StatusCode)> = vec![
            (
                UploadError::RangeMismatch {
                    expected_start: 10,
                    requested_start: 20,
                },
                StatusCode::RANGE_NOT_SATISFIABLE,
            ),
            (
                UploadError::MissingPredecessor {
                    upload_id: "abc".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::ChunkSizeMismatch {
                    declared: 10,
                    actual: 5,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::TotalMismatch {
                    recorded: 100,
                    declared: 200,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::OwnerMismatch {
                    upload_id: "abc".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                UploadError::Storage(std::io::Error::other("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_range_parse_error_is_416() {
        let err = UploadError::RangeParse(RangeParseError::InvalidFormat("bytes x".to_string()));
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_range_mismatch_body_reports_resume_offset() {
        use http_body_util::BodyExt;

        let response = AppError::RangeMismatch {
            expected_start: 1024,
            requested_start: 2048,
        }
        .into_response();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Range mismatch");
        assert_eq!(body["expectedStart"], 1024);
        assert_eq!(body["currentFileSize"], 1024);
        assert_eq!(body["requestedStart"], 2048);
    }

    #[test]
    fn test_store_not_found_is_404() {
        let response = AppError::from(StoreError::NotFound("x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
