// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`JobStore`] trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use outpost_config::model::{QueueConfig, StorageConfig};
use outpost_core::{
    AdapterType, BackoffPolicy, EnqueueReceipt, HealthStatus, Job, JobStatus, JobStore, NewJob,
    OutpostError, PluginAdapter, QueueStats, RetryOutcome, RetryPolicy,
};

use crate::database::Database;
use crate::queries::jobs;

/// Retry policy described by the `[queue]` section.
pub fn retry_policy(queue: &QueueConfig) -> RetryPolicy {
    RetryPolicy {
        backoff: BackoffPolicy {
            base: Duration::from_millis(queue.backoff_base_ms),
            max: Duration::from_millis(queue.backoff_max_ms),
            ..BackoffPolicy::default()
        },
        retry_ceiling: queue.retry_ceiling(),
    }
}

/// SQLite-backed job store.
///
/// The database is opened lazily by [`SqliteJobStore::initialize`]; every
/// other call fails with a storage error until then.
pub struct SqliteJobStore {
    config: StorageConfig,
    policy: RetryPolicy,
    db: OnceCell<Database>,
}

impl SqliteJobStore {
    pub fn new(config: StorageConfig, policy: RetryPolicy) -> Self {
        Self {
            config,
            policy,
            db: OnceCell::new(),
        }
    }

    /// Creates and initializes a store in one step.
    pub async fn open(config: StorageConfig, policy: RetryPolicy) -> Result<Self, OutpostError> {
        let store = Self::new(config, policy);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> Result<(), OutpostError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| OutpostError::Storage {
            source: "job store already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite job store initialized");
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn db(&self) -> Result<&Database, OutpostError> {
        self.db.get().ok_or_else(|| OutpostError::Storage {
            source: "job store not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteJobStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, OutpostError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), OutpostError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueReceipt, OutpostError> {
        let receipt = jobs::insert_job(self.db()?, job).await?;
        counter!("outpost_jobs_enqueued_total").increment(1);
        info!(
            job_id = %receipt.job_id,
            message_id = %receipt.message_id,
            priority = %receipt.priority,
            status = %receipt.status,
            "job enqueued"
        );
        Ok(receipt)
    }

    async fn claim_ready(&self, limit: usize) -> Result<Vec<Job>, OutpostError> {
        jobs::claim_ready(self.db()?, limit).await
    }

    async fn mark_active(&self, job_id: &str) -> Result<bool, OutpostError> {
        jobs::mark_active(self.db()?, job_id).await
    }

    async fn mark_completed(
        &self,
        job_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, OutpostError> {
        jobs::mark_completed(self.db()?, job_id, result).await
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<bool, OutpostError> {
        jobs::mark_failed(self.db()?, job_id, reason).await
    }

    async fn increment_attempts(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<Option<RetryOutcome>, OutpostError> {
        jobs::record_retryable_failure(self.db()?, job_id, error, self.policy, None).await
    }

    async fn update_progress(&self, job_id: &str, progress: i64) -> Result<(), OutpostError> {
        jobs::update_progress(self.db()?, job_id, progress).await
    }

    async fn stalled_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, OutpostError> {
        jobs::stalled_jobs(self.db()?, cutoff).await
    }

    async fn reclaim_stalled(
        &self,
        job_id: &str,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<RetryOutcome>, OutpostError> {
        jobs::record_retryable_failure(self.db()?, job_id, reason, self.policy, Some(cutoff)).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, OutpostError> {
        jobs::get_job(self.db()?, job_id).await
    }

    async fn get_jobs(
        &self,
        status: JobStatus,
        start: usize,
        end: usize,
    ) -> Result<Vec<Job>, OutpostError> {
        jobs::get_jobs(self.db()?, status, start, end).await
    }

    async fn stats(&self) -> Result<QueueStats, OutpostError> {
        jobs::stats(self.db()?).await
    }

    async fn pause_all(&self) -> Result<u64, OutpostError> {
        let n = jobs::pause_all(self.db()?).await?;
        info!(count = n, "paused jobs");
        Ok(n)
    }

    async fn resume_all(&self) -> Result<u64, OutpostError> {
        let n = jobs::resume_all(self.db()?).await?;
        info!(count = n, "resumed jobs");
        Ok(n)
    }

    async fn clear_all(&self) -> Result<u64, OutpostError> {
        let n = jobs::clear_all(self.db()?).await?;
        info!(count = n, "cleared jobs");
        Ok(n)
    }

    async fn clean_old_jobs(&self, retention_hours: u64) -> Result<u64, OutpostError> {
        let n = jobs::clean_old_jobs(self.db()?, retention_hours).await?;
        info!(count = n, retention_hours, "cleaned old jobs");
        Ok(n)
    }

    async fn retry_job(&self, job_id: &str) -> Result<bool, OutpostError> {
        let retried = jobs::retry_job(self.db()?, job_id).await?;
        if retried {
            info!(job_id, "job marked for retry");
        }
        Ok(retried)
    }

    async fn remove_job(&self, job_id: &str) -> Result<bool, OutpostError> {
        jobs::remove_job(self.db()?, job_id).await
    }
}
