// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Submit, query and control operations exposed to the outside.

use std::sync::Arc;

use tracing::info;

use outpost_config::OutpostConfig;
use outpost_core::{
    EnqueueReceipt, Job, JobStatus, JobStore, OutpostError, QueueStats, SubmitRequest,
};

use crate::processor::{ConfigUpdate, ProcessorStats, QueueProcessor};

/// Facade over the job store and, inside `serve`, the running processor.
///
/// Operator commands run without a processor; operations that need one
/// fail with a configuration error.
pub struct QueueService {
    store: Arc<dyn JobStore>,
    processor: Option<Arc<QueueProcessor>>,
    country_code: String,
    max_attempts: u32,
}

impl QueueService {
    pub fn new(store: Arc<dyn JobStore>, config: &OutpostConfig) -> Self {
        Self {
            store,
            processor: None,
            country_code: config.whatsapp.default_country_code.clone(),
            max_attempts: config.queue.max_attempts,
        }
    }

    pub fn with_processor(mut self, processor: Arc<QueueProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    // --- Submit ---

    /// Normalises the recipient and stores a new job.
    pub async fn enqueue(&self, request: SubmitRequest) -> Result<EnqueueReceipt, OutpostError> {
        let job = request.into_new_job(&self.country_code, self.max_attempts)?;
        self.store.enqueue(job).await
    }

    // --- Query ---

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, OutpostError> {
        self.store.get_job(job_id).await
    }

    /// Jobs in `status`, oldest first, over the half-open range `[start, end)`.
    pub async fn get_jobs(
        &self,
        status: JobStatus,
        start: usize,
        end: usize,
    ) -> Result<Vec<Job>, OutpostError> {
        self.store.get_jobs(status, start, end).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats, OutpostError> {
        self.store.stats().await
    }

    pub async fn processor_stats(&self) -> Result<ProcessorStats, OutpostError> {
        self.processor()?.stats().await
    }

    // --- Control ---

    /// Parks waiting and delayed jobs.
    pub async fn pause_queue(&self) -> Result<u64, OutpostError> {
        self.store.pause_all().await
    }

    /// Releases parked jobs and restarts a stopped processor.
    pub async fn resume_queue(&self) -> Result<u64, OutpostError> {
        let resumed = self.store.resume_all().await?;
        if let Some(processor) = &self.processor {
            processor.resume().await;
        }
        Ok(resumed)
    }

    /// Deletes every job that is not currently being delivered.
    pub async fn clear_queue(&self) -> Result<u64, OutpostError> {
        self.store.clear_all().await
    }

    pub async fn clean_queue(&self, retention_hours: u64) -> Result<u64, OutpostError> {
        self.store.clean_old_jobs(retention_hours).await
    }

    /// Moves a failed or paused job back to waiting with a fresh attempt budget.
    pub async fn retry_job(&self, job_id: &str) -> Result<Job, OutpostError> {
        let job = self.require(job_id).await?;
        if !self.store.retry_job(job_id).await? {
            return Err(OutpostError::Validation(format!(
                "job {job_id} is {}; only failed or paused jobs can be retried",
                job.status
            )));
        }
        info!(job_id, "job requeued");
        self.require(job_id).await
    }

    /// Deletes a single job unless it is being delivered.
    pub async fn remove_job(&self, job_id: &str) -> Result<(), OutpostError> {
        let job = self.require(job_id).await?;
        if !self.store.remove_job(job_id).await? {
            return Err(OutpostError::Validation(format!(
                "job {job_id} is {}; active jobs cannot be removed",
                job.status
            )));
        }
        info!(job_id, "job removed");
        Ok(())
    }

    pub fn update_config(&self, update: &ConfigUpdate) -> Result<(), OutpostError> {
        self.processor()?.update_config(update).map(|_| ())
    }

    fn processor(&self) -> Result<&Arc<QueueProcessor>, OutpostError> {
        self.processor
            .as_ref()
            .ok_or_else(|| OutpostError::Config("queue processor is not running".into()))
    }

    async fn require(&self, job_id: &str) -> Result<Job, OutpostError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| OutpostError::Validation(format!("job not found: {job_id}")))
    }
}
