// ==============================================================================
// processor.rs - Sales Aggregation Job Handler
// ==============================================================================
// Description: Turns an assembled upload into a per-department sales report
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregate::aggregate_file;
use crate::error::AggregationError;
use crate::models::{FileStatus, JobOutcome, JobPayload, JobStatus};
use crate::records::FileRecordStore;
use crate::runner::JobHandler;

/// Handler for `aggregate-sales` jobs.
///
/// Safe to re-run: the FileRecord upsert never regresses a completed record
/// and the report is atomically replaced with identical content.
pub struct AggregationWorker {
    records: Arc<dyn FileRecordStore>,
}

impl AggregationWorker {
    pub fn new(records: Arc<dyn FileRecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl JobHandler for AggregationWorker {
    async fn handle(&self, job: &JobPayload) -> Result<JobOutcome, AggregationError> {
        let record = self.records.create_file_record(job).await?;
        debug!("File record {} for upload {} is {:?}", record.id, job.upload_id, record.status);

        let input = PathBuf::from(&job.input_path);
        let output = PathBuf::from(&job.output_path);
        info!("Aggregating {:?} -> {:?}", input, output);

        let aggregate = tokio::task::spawn_blocking({
            let input = input.clone();
            let output = output.clone();
            move || aggregate_file(&input, &output)
        })
        .await
        .map_err(|e| AggregationError::Task(e.to_string()))??;

        self.records
            .update_file_record_status(&job.upload_id, FileStatus::Completed, Some(&job.result_name))
            .await?;

        Ok(JobOutcome {
            status: JobStatus::Done,
            output_path: output,
            groups: aggregate.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{result_name_for, FileMetadata};
    use crate::records::MemoryFileRecordStore;
    use uuid::Uuid;

    fn payload(dir: &std::path::Path, upload_id: &str) -> JobPayload {
        let result_name = result_name_for(upload_id);
        JobPayload {
            job_id: Uuid::new_v4(),
            upload_id: upload_id.to_string(),
            file: FileMetadata {
                owner_id: "alice".to_string(),
                file_name: "sales.csv".to_string(),
                original_name: "sales.csv".to_string(),
                size: 0,
                result_name: result_name.clone(),
            },
            input_path: dir.join("files").join(upload_id).to_string_lossy().to_string(),
            output_path: dir.join("results").join(&result_name).to_string_lossy().to_string(),
            result_name,
        }
    }

    #[tokio::test]
    async fn test_handle_writes_report_and_completes_record() {
        let dir = tempfile::tempdir().unwrap();
        let job = payload(dir.path(), "u1");
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        std::fs::write(&job.input_path, "Electronics,John,100\nElectronics,Jane,150\n,Bob,50\n").unwrap();

        let records = Arc::new(MemoryFileRecordStore::new());
        let worker = AggregationWorker::new(records.clone());
        let outcome = worker.handle(&job).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Done);
        assert_eq!(outcome.groups, 1);
        assert_eq!(
            std::fs::read_to_string(&job.output_path).unwrap(),
            "Department Name,Total Number of Sales\nElectronics,250\n"
        );

        let record = records.get("u1").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Completed);
        assert_eq!(record.result_name.as_deref(), Some("u1-aggregated_sales.csv"));
    }

    #[tokio::test]
    async fn test_missing_input_fails_and_leaves_record_processing() {
        let dir = tempfile::tempdir().unwrap();
        let job = payload(dir.path(), "u2");

        let records = Arc::new(MemoryFileRecordStore::new());
        let worker = AggregationWorker::new(records.clone());
        assert!(worker.handle(&job).await.is_err());

        let record = records.get("u2").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Processing);
        assert_eq!(record.result_name, None);
    }

    #[tokio::test]
    async fn test_rerun_keeps_record_completed() {
        let dir = tempfile::tempdir().unwrap();
        let job = payload(dir.path(), "u3");
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        std::fs::write(&job.input_path, "Toys,Mike,notanumber\n").unwrap();

        let records = Arc::new(MemoryFileRecordStore::new());
        let worker = AggregationWorker::new(records.clone());
        worker.handle(&job).await.unwrap();
        worker.handle(&job).await.unwrap();

        let record = records.get("u3").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Completed);
        assert_eq!(
            std::fs::read_to_string(&job.output_path).unwrap(),
            "Department Name,Total Number of Sales\nToys,0\n"
        );
    }
}
