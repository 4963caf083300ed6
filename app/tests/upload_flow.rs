// ==============================================================================
// upload_flow.rs - End-to-End Upload Test
// ==============================================================================
// Description: Three ranged chunks -> assembled file -> job -> report -> event
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use std::sync::Arc;

use sales_processor::models::FileStatus;
use sales_processor::notifier::CompletionNotifier;
use sales_processor::progress::MemoryProgressStore;
use sales_processor::queue::MemoryJobQueue;
use sales_processor::records::{FileRecordStore, MemoryFileRecordStore};
use sales_processor::runner::RunOutcome;
use sales_processor::{AggregationWorker, ChunkAssembler, ChunkStatus, JobRunner, RetryPolicy, StorageLayout};

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_three_chunk_upload_is_aggregated_and_owner_notified() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    layout.ensure().await.unwrap();

    let progress = Arc::new(MemoryProgressStore::default());
    let queue = Arc::new(MemoryJobQueue::new());
    let records = Arc::new(MemoryFileRecordStore::new());
    let notifier = Arc::new(CompletionNotifier::default());

    let assembler = ChunkAssembler::new(layout.clone(), progress.clone(), queue.clone(), records.clone());
    let runner = JobRunner::new(
        queue.clone(),
        Arc::new(AggregationWorker::new(records.clone())),
        notifier.clone(),
        RetryPolicy::default(),
    );

    let mut live = notifier.connect("alice");

    // 12-byte rows, 3 MiB total
    let body = "Toys,Mike,1\n".repeat(3 * MIB / 12).into_bytes();
    assert_eq!(body.len(), 3 * MIB);

    let upload_id = "e2e-upload";
    let total = body.len();
    let mut statuses = Vec::new();
    for (i, chunk) in body.chunks(MIB).enumerate() {
        let start = i * MIB;
        let end = start + chunk.len() - 1;
        let header = format!("bytes {}-{}/{}", start, end, total);
        let outcome = assembler
            .upload_chunk(upload_id, Some(&header), chunk, "alice", "sales.csv")
            .await
            .unwrap();
        statuses.push(outcome.status);
    }

    assert_eq!(
        statuses,
        vec![
            ChunkStatus::FirstChunkStored,
            ChunkStatus::ChunkAppended,
            ChunkStatus::UploadComplete
        ]
    );
    let canonical = layout.canonical_path(upload_id);
    assert_eq!(std::fs::metadata(&canonical).unwrap().len(), 3 * MIB as u64);
    assert_eq!(queue.enqueued_count(), 1);

    let record = records.get(upload_id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Processing);

    let outcome = runner.run_once().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { notified: true, .. }));
    assert_eq!(runner.run_once().await.unwrap(), RunOutcome::Idle);

    let record = records.get(upload_id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Completed);
    assert_eq!(record.result_name.as_deref(), Some("e2e-upload-aggregated_sales.csv"));
    assert_eq!(
        records.history(upload_id),
        vec![FileStatus::Processing, FileStatus::Completed]
    );

    let report = std::fs::read_to_string(layout.result_path("e2e-upload-aggregated_sales.csv")).unwrap();
    assert_eq!(report, format!("Department Name,Total Number of Sales\nToys,{}\n", 3 * MIB / 12));

    let event = live.events.recv().await.unwrap();
    assert_eq!(event.file_name, upload_id);
    assert_eq!(event.result_name, "e2e-upload-aggregated_sales.csv");
    // The listed file and the event name the same stored file
    assert_eq!(record.path, event.file_name);
    assert!(live.events.try_recv().is_err());

    let progress = assembler.get_progress(upload_id).await.unwrap().unwrap();
    assert_eq!(progress.loaded, total as u64);
    assert_eq!(progress.progress, 100);
}
