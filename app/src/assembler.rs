// ==============================================================================
// assembler.rs - Chunk Assembler
// ==============================================================================
// Description: Appends ranged chunks into one canonical file per upload id
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Chunk flow:
// 1. `admit` rejects misplaced chunks and foreign owners before the body is read
// 2. Caller streams the request body into a staging file (`stage_file`)
// 3. `accept` takes the per-upload lock and checks the canonical file length
// 4. start == 0 renames the staged file into place, later chunks append
// 5. The terminal chunk records progress, creates the FileRecord and enqueues
//    exactly one aggregation job
// ==============================================================================

use dashmap::DashMap;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageLayout;
use crate::error::UploadError;
use crate::models::{
    result_name_for, FileMetadata, JobPayload, ProgressRecord, UploadSession, UploadStatus,
};
use crate::progress::ProgressStore;
use crate::queue::{JobQueue, QueuedJob, AGGREGATE_SALES};
use crate::range::{parse_content_range, ContentRange};
use crate::records::FileRecordStore;

const MAX_UPLOAD_ID_LEN: usize = 128;
const MAX_FILE_NAME_LEN: usize = 255;

/// One received chunk, already written to a staging file
#[derive(Debug)]
pub struct ChunkRequest {
    pub upload_id: String,
    pub owner_id: String,
    /// File name as declared by the client
    pub original_name: String,
    pub range: Option<ContentRange>,
    /// Removed automatically if the chunk is rejected
    pub staged: TempPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStatus {
    FirstChunkStored,
    ChunkAppended,
    UploadComplete,
}

/// Result of accepting a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    pub status: ChunkStatus,
    pub upload_id: String,
    /// Authoritative length of the canonical file
    pub received_bytes: u64,
    pub total: u64,
    pub is_complete: bool,
    pub canonical_path: PathBuf,
    /// Job submitted for this upload, if it is complete
    pub job_id: Option<Uuid>,
}

impl ChunkOutcome {
    /// Offset the client should use for its next chunk
    pub fn next_expected_start(&self) -> u64 {
        self.received_bytes
    }
}

/// Reject ids that could escape the storage directory
pub fn validate_upload_id(upload_id: &str) -> Result<(), UploadError> {
    let valid = !upload_id.is_empty()
        && upload_id.len() <= MAX_UPLOAD_ID_LEN
        && upload_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(UploadError::InvalidUploadId(upload_id.to_string()))
    }
}

/// Reduce a client-declared file name to a safe single path component
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let safe: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(MAX_FILE_NAME_LEN)
        .collect();
    let safe = safe.trim_start_matches('.');

    if safe.is_empty() {
        "upload".to_string()
    } else {
        safe.to_string()
    }
}

pub struct ChunkAssembler {
    layout: StorageLayout,
    progress: Arc<dyn ProgressStore>,
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn FileRecordStore>,
    sessions: DashMap<String, Arc<Mutex<UploadSession>>>,
}

impl ChunkAssembler {
    pub fn new(
        layout: StorageLayout,
        progress: Arc<dyn ProgressStore>,
        queue: Arc<dyn JobQueue>,
        records: Arc<dyn FileRecordStore>,
    ) -> Self {
        Self {
            layout,
            progress,
            queue,
            records,
            sessions: DashMap::new(),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Create an empty staging file for an incoming chunk body
    pub fn stage_file(&self) -> Result<(tokio::fs::File, TempPath), UploadError> {
        let staged = tempfile::Builder::new()
            .prefix("chunk-")
            .tempfile_in(self.layout.staging_dir())?;
        let (file, path) = staged.into_parts();
        Ok((tokio::fs::File::from_std(file), path))
    }

    /// Convenience entry point for callers holding the chunk in memory
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        range_header: Option<&str>,
        bytes: &[u8],
        owner_id: &str,
        original_name: &str,
    ) -> Result<ChunkOutcome, UploadError> {
        let range = parse_content_range(range_header)?;
        validate_upload_id(upload_id)?;

        let (mut file, staged) = self.stage_file()?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        self.accept(ChunkRequest {
            upload_id: upload_id.to_string(),
            owner_id: owner_id.to_string(),
            original_name: original_name.to_string(),
            range,
            staged,
        })
        .await
    }

    /// Latest progress record for an upload, if it hasn't expired
    pub async fn get_progress(&self, upload_id: &str) -> Result<Option<ProgressRecord>, UploadError> {
        validate_upload_id(upload_id)?;
        self.progress.get(upload_id).await.map_err(UploadError::Progress)
    }

    /// Check a chunk against the current file before its body is read.
    ///
    /// Claims the upload id for `owner_id` if nobody has yet. Runs the same
    /// placement rules as `accept`, so a request that `accept` would reject
    /// fails here without streaming anything.
    pub async fn admit(
        &self,
        upload_id: &str,
        owner_id: &str,
        range: Option<ContentRange>,
    ) -> Result<(), UploadError> {
        validate_upload_id(upload_id)?;

        let session = self.session(upload_id);
        let mut session = session.lock().await;
        session.last_activity = tokio::time::Instant::now();

        self.claim(&mut session, owner_id).await?;
        check_total(&session, range)?;
        resume(&mut session);

        let current = file_len(&session.target_path).await?;
        if let Some(len) = current {
            session.received_bytes = len;
        }
        let completed = session.status == UploadStatus::Completed;
        place(upload_id, range, current, completed).map(|_| ())
    }

    /// Publish streaming progress for an admitted chunk.
    ///
    /// Dropped unless `owner_id` holds the upload and `record` is ahead of
    /// everything already published. Returns whether the record was written.
    pub async fn record_progress(
        &self,
        upload_id: &str,
        owner_id: &str,
        record: &ProgressRecord,
    ) -> Result<bool, UploadError> {
        validate_upload_id(upload_id)?;

        let session = self.session(upload_id);
        let mut session = session.lock().await;

        let floor = session.received_bytes.max(session.reported_bytes);
        if session.status != UploadStatus::Uploading
            || session.owner_id.as_deref() != Some(owner_id)
            || record.loaded <= floor
        {
            return Ok(false);
        }

        self.progress
            .put(upload_id, record)
            .await
            .map_err(UploadError::Progress)?;
        session.reported_bytes = record.loaded;
        Ok(true)
    }

    /// User that claimed an upload id, if any
    pub async fn owner_of(&self, upload_id: &str) -> Result<Option<String>, UploadError> {
        validate_upload_id(upload_id)?;
        if let Some(session) = self.sessions.get(upload_id).map(|entry| entry.value().clone()) {
            if let Some(owner) = session.lock().await.owner_id.clone() {
                return Ok(Some(owner));
            }
        }
        read_owner(&self.layout.owner_path(upload_id)).await
    }

    /// Apply one staged chunk to the canonical file
    pub async fn accept(&self, request: ChunkRequest) -> Result<ChunkOutcome, UploadError> {
        validate_upload_id(&request.upload_id)?;

        let staged_len = tokio::fs::metadata(&request.staged).await?.len();
        if let Some(range) = request.range {
            if staged_len != range.len() {
                return Err(UploadError::ChunkSizeMismatch {
                    declared: range.len(),
                    actual: staged_len,
                });
            }
        }

        let session = self.session(&request.upload_id);
        let mut session = session.lock().await;
        session.last_activity = tokio::time::Instant::now();

        self.claim(&mut session, &request.owner_id).await?;
        check_total(&session, request.range)?;
        resume(&mut session);

        let result = self.apply(&mut session, request, staged_len).await;
        if let Err(UploadError::Storage(e)) = &result {
            warn!("Storage failure on upload {}: {}", session.upload_id, e);
            session.status = UploadStatus::Error;
        }
        result
    }

    async fn apply(
        &self,
        session: &mut UploadSession,
        request: ChunkRequest,
        staged_len: u64,
    ) -> Result<ChunkOutcome, UploadError> {
        let ChunkRequest {
            upload_id,
            owner_id,
            original_name,
            range,
            staged,
        } = request;
        let canonical = session.target_path.clone();
        let current = file_len(&canonical).await?;
        let completed = session.status == UploadStatus::Completed;

        let placement = match place(&upload_id, range, current, completed) {
            Ok(placement) => placement,
            Err(e) => {
                if let Some(len) = current {
                    session.received_bytes = len;
                }
                return Err(e);
            }
        };

        let status = match placement {
            Placement::AlreadyComplete { len } => {
                debug!("Upload {} already assembled, ignoring redundant chunk", upload_id);
                session.received_bytes = len;
                ChunkStatus::UploadComplete
            }
            Placement::Store => {
                persist(staged, &canonical)?;
                session.received_bytes = staged_len;
                if range.is_none() {
                    info!("Stored whole file for upload {} ({} bytes)", upload_id, staged_len);
                }
                ChunkStatus::FirstChunkStored
            }
            Placement::Append { offset } => {
                append(&staged, &canonical, offset).await?;
                session.received_bytes = offset + staged_len;
                ChunkStatus::ChunkAppended
            }
        };

        let total = range.map_or(session.received_bytes, |r| r.total);
        session.total = Some(total);

        let terminal = range.map_or(true, |r| r.is_terminal());
        if status == ChunkStatus::UploadComplete || terminal {
            return self.finish(session, &owner_id, &original_name, total).await;
        }

        let record = ProgressRecord::uploading(session.received_bytes, total, Some(original_name.clone()));
        self.progress
            .put(&upload_id, &record)
            .await
            .map_err(UploadError::Progress)?;
        session.reported_bytes = session.reported_bytes.max(session.received_bytes);

        Ok(ChunkOutcome {
            status,
            upload_id,
            received_bytes: session.received_bytes,
            total,
            is_complete: false,
            canonical_path: canonical,
            job_id: None,
        })
    }

    /// Bind the upload id to `owner_id`, or reject a different user
    async fn claim(&self, session: &mut UploadSession, owner_id: &str) -> Result<(), UploadError> {
        if session.owner_id.is_none() {
            let marker = self.layout.owner_path(&session.upload_id);
            session.owner_id = match read_owner(&marker).await? {
                Some(owner) => Some(owner),
                None => {
                    tokio::fs::write(&marker, owner_id).await?;
                    debug!("Upload {} claimed by {}", session.upload_id, owner_id);
                    Some(owner_id.to_string())
                }
            };
        }

        match session.owner_id.as_deref() {
            Some(owner) if owner != owner_id => {
                warn!("User {} tried to write upload {} owned by {}", owner_id, session.upload_id, owner);
                Err(UploadError::OwnerMismatch {
                    upload_id: session.upload_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Terminal transition: progress to 100%, FileRecord, one job
    async fn finish(
        &self,
        session: &mut UploadSession,
        owner_id: &str,
        original_name: &str,
        total: u64,
    ) -> Result<ChunkOutcome, UploadError> {
        let upload_id = session.upload_id.clone();

        self.progress
            .put(&upload_id, &ProgressRecord::completed(total, Some(original_name.to_string())))
            .await
            .map_err(UploadError::Progress)?;

        let job_id = match session.job_id {
            Some(job_id) => {
                debug!("Upload {} already has job {}, not enqueuing again", upload_id, job_id);
                job_id
            }
            None => {
                let payload = self.job_payload(session, owner_id, original_name, total);
                self.records
                    .create_file_record(&payload)
                    .await
                    .map_err(UploadError::Records)?;
                let job_id = self
                    .queue
                    .enqueue(QueuedJob::new(AGGREGATE_SALES, payload))
                    .await
                    .map_err(UploadError::Queue)?;
                info!("Upload {} complete ({} bytes), queued job {}", upload_id, total, job_id);
                session.job_id = Some(job_id);
                job_id
            }
        };
        session.status = UploadStatus::Completed;

        Ok(ChunkOutcome {
            status: ChunkStatus::UploadComplete,
            upload_id,
            received_bytes: session.received_bytes,
            total,
            is_complete: true,
            canonical_path: session.target_path.clone(),
            job_id: Some(job_id),
        })
    }

    fn job_payload(
        &self,
        session: &UploadSession,
        owner_id: &str,
        original_name: &str,
        total: u64,
    ) -> JobPayload {
        let result_name = result_name_for(&session.upload_id);
        JobPayload {
            job_id: Uuid::new_v4(),
            upload_id: session.upload_id.clone(),
            file: FileMetadata {
                owner_id: owner_id.to_string(),
                file_name: sanitize_file_name(original_name),
                original_name: original_name.to_string(),
                size: total,
                result_name: result_name.clone(),
            },
            input_path: session.target_path.to_string_lossy().to_string(),
            output_path: self
                .layout
                .result_path(&result_name)
                .to_string_lossy()
                .to_string(),
            result_name,
        }
    }

    fn session(&self, upload_id: &str) -> Arc<Mutex<UploadSession>> {
        self.sessions
            .entry(upload_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(UploadSession::new(
                    upload_id,
                    self.layout.canonical_path(upload_id),
                )))
            })
            .clone()
    }

    /// Forget sessions idle for longer than `ttl`. Returns how many were dropped.
    ///
    /// The canonical file stays on disk; a later chunk rebuilds the session
    /// from its length. A session some request still holds a handle to is
    /// kept, so two requests never lock different sessions for one upload.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            if Arc::strong_count(session) > 1 {
                return true;
            }
            match session.try_lock() {
                Ok(session) => session.last_activity.elapsed() < ttl,
                Err(_) => true,
            }
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// Where a chunk goes relative to the canonical file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Write the chunk as the whole canonical file
    Store,
    Append { offset: u64 },
    /// Every byte is already on disk
    AlreadyComplete { len: u64 },
}

/// Decide what a chunk does given the current canonical length.
///
/// A request without a range is a whole file: it may only create the file,
/// or be answered from an upload that already completed.
fn place(
    upload_id: &str,
    range: Option<ContentRange>,
    current: Option<u64>,
    completed: bool,
) -> Result<Placement, UploadError> {
    match (range, current) {
        (None, Some(len)) if completed => Ok(Placement::AlreadyComplete { len }),
        (None, Some(len)) if len > 0 => Err(UploadError::RangeMismatch {
            expected_start: len,
            requested_start: 0,
        }),
        (None, _) => Ok(Placement::Store),
        (Some(range), Some(len)) if len == range.total => Ok(Placement::AlreadyComplete { len }),
        (Some(range), None | Some(0)) if range.start == 0 => Ok(Placement::Store),
        (Some(_), None) => Err(UploadError::MissingPredecessor {
            upload_id: upload_id.to_string(),
        }),
        (Some(range), Some(len)) if len != range.start => Err(UploadError::RangeMismatch {
            expected_start: len,
            requested_start: range.start,
        }),
        (Some(_), Some(len)) => Ok(Placement::Append { offset: len }),
    }
}

/// Leave the error state; callers re-read the canonical length next
fn resume(session: &mut UploadSession) {
    if session.status == UploadStatus::Error {
        debug!("Upload {} resuming after a storage error", session.upload_id);
        session.status = UploadStatus::Uploading;
    }
}

/// A chunk's declared total must match the one recorded for the upload
fn check_total(session: &UploadSession, range: Option<ContentRange>) -> Result<(), UploadError> {
    if let (Some(range), Some(recorded)) = (range, session.total) {
        if range.total != recorded {
            return Err(UploadError::TotalMismatch {
                recorded,
                declared: range.total,
            });
        }
    }
    Ok(())
}

async fn read_owner(marker: &Path) -> Result<Option<String>, UploadError> {
    match tokio::fs::read_to_string(marker).await {
        Ok(owner) => Ok(Some(owner)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Length of `path`, or None if it doesn't exist
async fn file_len(path: &Path) -> Result<Option<u64>, UploadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn persist(staged: TempPath, target: &Path) -> Result<(), UploadError> {
    staged.persist(target).map_err(|e| UploadError::Storage(e.error))
}

/// Append the staged bytes; on failure truncate back to `expected_len`
async fn append(staged: &Path, target: &Path, expected_len: u64) -> Result<(), UploadError> {
    let mut source = tokio::fs::File::open(staged).await?;
    let mut dest = tokio::fs::OpenOptions::new().append(true).open(target).await?;

    let copied = async {
        tokio::io::copy(&mut source, &mut dest).await?;
        dest.flush().await?;
        dest.sync_data().await
    }
    .await;

    if let Err(e) = copied {
        warn!("Append to {:?} failed, truncating to {} bytes: {}", target, expected_len, e);
        if let Err(truncate_err) = dest.set_len(expected_len).await {
            warn!("Failed to truncate {:?}: {}", target, truncate_err);
        }
        return Err(e.into());
    }
    Ok(())
}
