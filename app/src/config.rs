// ==============================================================================
// config.rs - Runtime Configuration
// ==============================================================================
// Description: Environment-driven settings and on-disk storage layout
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::runner::RetryPolicy;

/// Directory layout under the storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    staging_dir: PathBuf,
    files_dir: PathBuf,
    results_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            staging_dir: root.join("staging"),
            files_dir: root.join("files"),
            results_dir: root.join("results"),
            root,
        }
    }

    /// Create all directories if they don't exist
    pub async fn ensure(&self) -> Result<()> {
        for dir in [&self.staging_dir, &self.files_dir, &self.results_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for temporary chunk files
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Directory for canonical assembled files
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Directory for aggregation outputs
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Canonical file for an upload id (caller validates the id)
    pub fn canonical_path(&self, upload_id: &str) -> PathBuf {
        self.files_dir.join(upload_id)
    }

    /// Owner marker kept next to the canonical file
    pub fn owner_path(&self, upload_id: &str) -> PathBuf {
        self.files_dir.join(format!("{}.owner", upload_id))
    }

    pub fn result_path(&self, result_name: &str) -> PathBuf {
        self.results_dir.join(result_name)
    }
}

/// Process settings shared by the gateway, worker and CLI
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub redis_url: String,
    pub storage_root: PathBuf,
    pub server_port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub max_chunk_bytes: usize,
    pub worker_concurrency: usize,
    pub retry_policy: RetryPolicy,
    pub progress_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            storage_root: PathBuf::from("./uploads"),
            server_port: 5000,
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
            max_chunk_bytes: 2 * 1024 * 1024 * 1024,
            worker_concurrency: 4,
            retry_policy: RetryPolicy::default(),
            progress_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl Settings {
    /// Load settings from environment variables (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let cors_allowed_origins = match std::env::var("CORS_ALLOWED_ORIGINS") {
            Ok(origins) => origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.cors_allowed_origins,
        };

        let retry_policy = RetryPolicy::new(
            env_or("JOB_MAX_ATTEMPTS", defaults.retry_policy.max_attempts)?,
            Duration::from_millis(env_or(
                "JOB_BACKOFF_BASE_MS",
                defaults.retry_policy.base_delay.as_millis() as u64,
            )?),
        );

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            storage_root: std::env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            server_port: env_or("SERVER_PORT", defaults.server_port)?,
            cors_allowed_origins,
            max_chunk_bytes: env_or("MAX_CHUNK_BYTES", defaults.max_chunk_bytes)?,
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency)?.max(1),
            retry_policy,
            progress_ttl: Duration::from_secs(env_or(
                "PROGRESS_TTL_SECS",
                defaults.progress_ttl.as_secs(),
            )?),
        })
    }

    /// DATABASE_URL is mandatory for the long-running services
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set")
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage_root)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, value, e)),
        Err(_) => Ok(default),
    }
}
