// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job store contract.
//!
//! The store owns every job record. The processor and the stall detector
//! only request transitions through this trait. Storage errors propagate to
//! the caller; implementations never retry internally.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::OutpostError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{EnqueueReceipt, Job, JobStatus, NewJob, QueueStats, RetryOutcome};

#[async_trait]
pub trait JobStore: PluginAdapter {
    /// Persists a new job. Status is `delayed` when `delay_ms > 0`, else `waiting`.
    ///
    /// Fails with [`OutpostError::Validation`] on missing payload fields and
    /// [`OutpostError::DuplicateMessage`] when the message id is taken.
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueReceipt, OutpostError>;

    /// Atomically selects up to `limit` ready jobs and marks them `active`.
    ///
    /// Due `delayed` jobs are promoted first. Ready means `waiting` with
    /// `next_retry <= now`, ordered by priority descending then age. No two
    /// concurrent calls ever return the same job.
    async fn claim_ready(&self, limit: usize) -> Result<Vec<Job>, OutpostError>;

    /// Moves a `waiting` job to `active`. Returns false if the job was not waiting.
    async fn mark_active(&self, job_id: &str) -> Result<bool, OutpostError>;

    /// Records success. Applies to any non-terminal job.
    async fn mark_completed(
        &self,
        job_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, OutpostError>;

    /// Fails a non-terminal job immediately regardless of remaining attempts.
    async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<bool, OutpostError>;

    /// Applies a retryable failure to an `active` job.
    ///
    /// Returns `None` if the job is no longer active (e.g. reclaimed by the
    /// stall detector in the meantime).
    async fn increment_attempts(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<Option<RetryOutcome>, OutpostError>;

    /// Sets progress clamped to `[0, 100]`. Ignored for terminal jobs.
    async fn update_progress(&self, job_id: &str, progress: i64) -> Result<(), OutpostError>;

    /// Active jobs whose `processed_at` predates `cutoff`.
    async fn stalled_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, OutpostError>;

    /// Records `stalled_at` and applies a retryable failure, but only if the
    /// job is still active with `processed_at < cutoff`.
    async fn reclaim_stalled(
        &self,
        job_id: &str,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<RetryOutcome>, OutpostError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, OutpostError>;

    /// Jobs in `status`, ordered like claims, paginated over `[start, end)`.
    async fn get_jobs(
        &self,
        status: JobStatus,
        start: usize,
        end: usize,
    ) -> Result<Vec<Job>, OutpostError>;

    async fn stats(&self) -> Result<QueueStats, OutpostError>;

    /// `waiting`/`delayed` → `paused`. Returns the number of jobs changed.
    async fn pause_all(&self) -> Result<u64, OutpostError>;

    /// `paused` → `waiting`. Returns the number of jobs changed.
    async fn resume_all(&self) -> Result<u64, OutpostError>;

    /// Deletes every job that is not `active`.
    async fn clear_all(&self) -> Result<u64, OutpostError>;

    /// Deletes `completed`/`failed` jobs that finished more than `retention_hours` ago.
    async fn clean_old_jobs(&self, retention_hours: u64) -> Result<u64, OutpostError>;

    /// `failed`/`paused` → `waiting`, eligible immediately. False otherwise.
    async fn retry_job(&self, job_id: &str) -> Result<bool, OutpostError>;

    /// Deletes a single non-active job.
    async fn remove_job(&self, job_id: &str) -> Result<bool, OutpostError>;
}
