// ==============================================================================
// state.rs - Application State Management
// ==============================================================================
// Description: Shared application state for the upload gateway
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use sales_processor::notifier::CompletionNotifier;
use sales_processor::progress::{ProgressStore, RedisProgressStore};
use sales_processor::queue::{JobQueue, RedisJobQueue, AGGREGATE_SALES};
use sales_processor::records::{FileRecordStore, PgFileRecordStore};
use sales_processor::{ChunkAssembler, Settings, StorageLayout};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    settings: Settings,
    assembler: Arc<ChunkAssembler>,
    records: Arc<dyn FileRecordStore>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<CompletionNotifier>,
    /// Dedicated client for the completion subscriber (absent in tests)
    redis_client: Option<RedisClient>,
}

impl AppState {
    /// Connect to PostgreSQL and Redis and prepare the storage root
    pub async fn new(settings: Settings) -> Result<Self> {
        let database_url = settings.require_database_url()?;

        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let records = PgFileRecordStore::new(db_pool);
        records
            .ensure_schema()
            .await
            .context("Failed to create file_records table")?;

        let redis_client = RedisClient::open(settings.redis_url.as_str())
            .context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(redis_client.clone())
            .await
            .context("Failed to connect to Redis")?;

        let layout = settings.storage_layout();
        layout
            .ensure()
            .await
            .context("Failed to prepare storage directories")?;

        let progress: Arc<dyn ProgressStore> =
            Arc::new(RedisProgressStore::new(conn.clone(), settings.progress_ttl));
        let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(conn, AGGREGATE_SALES));
        queue.ping().await.context("Redis PING failed")?;

        let records: Arc<dyn FileRecordStore> = Arc::new(records);
        let assembler = Arc::new(ChunkAssembler::new(
            layout,
            progress,
            queue.clone(),
            records.clone(),
        ));

        Ok(Self::from_parts(
            settings,
            assembler,
            records,
            queue,
            Arc::new(CompletionNotifier::default()),
            Some(redis_client),
        ))
    }

    pub fn from_parts(
        settings: Settings,
        assembler: Arc<ChunkAssembler>,
        records: Arc<dyn FileRecordStore>,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<CompletionNotifier>,
        redis_client: Option<RedisClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                settings,
                assembler,
                records,
                queue,
                notifier,
                redis_client,
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn assembler(&self) -> &Arc<ChunkAssembler> {
        &self.inner.assembler
    }

    pub fn layout(&self) -> &StorageLayout {
        self.inner.assembler.layout()
    }

    pub fn records(&self) -> &Arc<dyn FileRecordStore> {
        &self.inner.records
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.inner.queue
    }

    pub fn notifier(&self) -> &Arc<CompletionNotifier> {
        &self.inner.notifier
    }

    pub fn redis_client(&self) -> Option<&RedisClient> {
        self.inner.redis_client.as_ref()
    }

    /// State backed by in-memory stores under `root`
    #[cfg(test)]
    pub async fn mock(root: &std::path::Path) -> Self {
        use sales_processor::progress::MemoryProgressStore;
        use sales_processor::queue::MemoryJobQueue;
        use sales_processor::records::MemoryFileRecordStore;

        let settings = Settings {
            storage_root: root.to_path_buf(),
            ..Settings::default()
        };
        let layout = settings.storage_layout();
        layout.ensure().await.expect("storage layout");

        let progress: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::default());
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
        let records: Arc<dyn FileRecordStore> = Arc::new(MemoryFileRecordStore::new());
        let assembler = Arc::new(ChunkAssembler::new(
            layout,
            progress,
            queue.clone(),
            records.clone(),
        ));

        Self::from_parts(
            settings,
            assembler,
            records,
            queue,
            Arc::new(CompletionNotifier::default()),
            None,
        )
    }
}
