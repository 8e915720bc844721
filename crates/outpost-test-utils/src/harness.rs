// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end queue tests.
//!
//! `TestHarness` assembles a temp SQLite job store, a [`MockDeliveryChannel`]
//! and a [`QueueProcessor`], plus the [`QueueService`] facade over them.

use std::sync::Arc;
use std::time::Duration;

use outpost_config::model::{OutpostConfig, QueueConfig, StorageConfig};
use outpost_core::{
    DeliveryChannel, EnqueueReceipt, Job, JobStore, OutpostError, Priority, SubmitRequest,
};
use outpost_queue::{QueueProcessor, QueueService, StallDetector};
use outpost_storage::{SqliteJobStore, retry_policy};

use crate::mock_channel::MockDeliveryChannel;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    queue: QueueConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            queue: QueueConfig::default(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.queue.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.queue.max_attempts = max_attempts;
        self
    }

    /// Replaces the whole queue section.
    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, OutpostError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| OutpostError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        let config = OutpostConfig {
            storage: StorageConfig {
                database_path: db_path.to_string_lossy().to_string(),
                wal_mode: true,
            },
            queue: self.queue,
            ..OutpostConfig::default()
        };

        let store = Arc::new(
            SqliteJobStore::open(config.storage.clone(), retry_policy(&config.queue)).await?,
        );
        let channel = Arc::new(MockDeliveryChannel::new());
        let processor = QueueProcessor::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&channel) as Arc<dyn DeliveryChannel>,
            config.queue.clone(),
        );
        let service = QueueService::new(Arc::clone(&store) as Arc<dyn JobStore>, &config)
            .with_processor(Arc::clone(&processor));

        Ok(TestHarness {
            store,
            channel,
            processor,
            service,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock channel and temp storage.
pub struct TestHarness {
    pub store: Arc<SqliteJobStore>,
    pub channel: Arc<MockDeliveryChannel>,
    pub processor: Arc<QueueProcessor>,
    pub service: QueueService,
    pub config: OutpostConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Submits a normal-priority message through the service facade.
    pub async fn submit(&self, recipient: &str, body: &str) -> Result<EnqueueReceipt, OutpostError> {
        self.submit_with(recipient, body, Priority::Normal).await
    }

    pub async fn submit_with(
        &self,
        recipient: &str,
        body: &str,
        priority: Priority,
    ) -> Result<EnqueueReceipt, OutpostError> {
        self.service
            .enqueue(SubmitRequest {
                recipient: recipient.to_string(),
                body: body.to_string(),
                priority,
                delay_ms: 0,
                message_id: None,
            })
            .await
    }

    pub async fn job(&self, job_id: &str) -> Result<Job, OutpostError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| OutpostError::Internal(format!("job {job_id} missing")))
    }

    /// A stall detector over this harness' store and live processor config.
    pub fn stall_detector(&self) -> StallDetector {
        StallDetector::for_processor(Arc::clone(&self.store) as Arc<dyn JobStore>, &self.processor)
    }

    /// Waits until no dispatch is in flight.
    pub async fn settle(&self) -> Result<(), OutpostError> {
        let limit = Duration::from_secs(10);
        tokio::time::timeout(limit, async {
            while self.processor.in_flight_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| OutpostError::Timeout { duration: limit })
    }
}
