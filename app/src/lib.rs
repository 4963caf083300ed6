// ==============================================================================
// lib.rs - Sales Processor Library
// ==============================================================================
// Description: Chunked upload assembly, job queue and sales aggregation
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

pub mod aggregate;
pub mod assembler;
pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod range;
pub mod records;
pub mod runner;

pub use assembler::{ChunkAssembler, ChunkOutcome, ChunkRequest, ChunkStatus};
pub use config::{Settings, StorageLayout};
pub use error::{AggregationError, StoreError, UploadError};
pub use processor::AggregationWorker;
pub use runner::{JobRunner, RetryPolicy};
