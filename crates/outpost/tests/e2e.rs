// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the delivery pipeline.
//!
//! Each test wires a temp SQLite job store, the real channel manager over a
//! mock session driver, and a running queue processor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use outpost_channel::ChannelManager;
use outpost_config::OutpostConfig;
use outpost_config::model::{ChannelConfig, StorageConfig};
use outpost_core::{
    ChannelEvent, ConnectionState, CredentialStore, DeliveryChannel, DriverFactory, Job,
    JobStatus, JobStore, PluginAdapter, Priority, RecoveryListener, SubmitRequest,
};
use outpost_queue::{QueueProcessor, QueueService};
use outpost_storage::{SqliteJobStore, retry_policy};
use outpost_test_utils::{MockCredentialStore, MockDriverFactory};

struct Pipeline {
    store: Arc<SqliteJobStore>,
    factory: Arc<MockDriverFactory>,
    channel: Arc<ChannelManager>,
    processor: Arc<QueueProcessor>,
    service: QueueService,
    _dir: tempfile::TempDir,
}

impl Pipeline {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OutpostConfig {
            storage: StorageConfig {
                database_path: dir.path().join("e2e.db").to_string_lossy().to_string(),
                wal_mode: true,
            },
            channel: ChannelConfig {
                disconnect_recovery_delay_ms: 50,
                ..ChannelConfig::default()
            },
            ..OutpostConfig::default()
        };
        config.queue.process_interval_ms = 50;

        let store = Arc::new(
            SqliteJobStore::open(config.storage.clone(), retry_policy(&config.queue))
                .await
                .unwrap(),
        );
        let factory = Arc::new(MockDriverFactory::new());
        let channel = ChannelManager::new(
            config.channel.clone(),
            Arc::clone(&factory) as Arc<dyn DriverFactory>,
            Arc::new(MockCredentialStore::paired()) as Arc<dyn CredentialStore>,
        );
        let processor = QueueProcessor::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&channel) as Arc<dyn DeliveryChannel>,
            config.queue.clone(),
        );
        channel.add_listener(Arc::clone(&processor) as Arc<dyn RecoveryListener>);
        let service = QueueService::new(Arc::clone(&store) as Arc<dyn JobStore>, &config)
            .with_processor(Arc::clone(&processor));

        channel.connect().await.unwrap();
        let ready = &channel;
        eventually(|| async move { ready.is_ready() }).await;
        processor.start().await;

        Self {
            store,
            factory,
            channel,
            processor,
            service,
            _dir: dir,
        }
    }

    async fn submit(&self, recipient: &str, body: &str) -> String {
        self.service
            .enqueue(SubmitRequest {
                recipient: recipient.into(),
                body: body.into(),
                priority: Priority::Normal,
                delay_ms: 0,
                message_id: None,
            })
            .await
            .unwrap()
            .job_id
    }

    async fn job(&self, job_id: &str) -> Job {
        self.store.get_job(job_id).await.unwrap().unwrap()
    }

    async fn wait_for(&self, job_id: &str, status: JobStatus) -> Job {
        eventually(|| async move { self.job(job_id).await.status == status }).await;
        self.job(job_id).await
    }

    async fn stop(&self) {
        self.processor.stop().await;
        self.channel.shutdown().await;
        self.store.shutdown().await.unwrap();
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 10s");
}

#[tokio::test]
async fn submitted_message_is_delivered_through_the_session() {
    let p = Pipeline::start().await;
    let job_id = p.submit("081234567890", "your order shipped").await;

    let job = p.wait_for(&job_id, JobStatus::Completed).await;
    let result = job.result.unwrap();
    assert_eq!(result["sentMessageId"], "mock-receipt-1");
    assert_eq!(result["to"], "6281234567890");

    let sent = p.factory.driver(0).unwrap().sent();
    assert_eq!(
        sent,
        vec![(
            "6281234567890@c.us".to_string(),
            "your order shipped".to_string()
        )]
    );
    p.stop().await;
}

#[tokio::test]
async fn delivery_resumes_after_channel_recovery() {
    let p = Pipeline::start().await;
    p.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "NAVIGATION".into(),
    });
    let channel = &p.channel;
    eventually(|| async move { channel.state() != ConnectionState::Ready }).await;

    let job_id = p.submit("081234567890", "sent after reconnect").await;
    p.wait_for(&job_id, JobStatus::Completed).await;

    assert_eq!(p.factory.created_count(), 2);
    assert!(p.factory.driver(0).unwrap().sent().is_empty());
    assert_eq!(p.factory.driver(1).unwrap().sent().len(), 1);
    assert!(p.processor.is_processing());
    p.stop().await;
}

#[tokio::test]
async fn transient_send_failure_is_retried_to_completion() {
    let p = Pipeline::start().await;
    p.factory
        .driver(0)
        .unwrap()
        .fail_next_send("Protocol error (Runtime.callFunctionOn): Target closed.");

    let job_id = p.submit("081234567890", "second time lucky").await;
    let job = p.wait_for(&job_id, JobStatus::Completed).await;
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("Target closed"));
    p.stop().await;
}

#[tokio::test]
async fn unregistered_recipient_fails_without_sending() {
    let p = Pipeline::start().await;
    p.factory.driver(0).unwrap().mark_unregistered("6289999999999@c.us");

    let job_id = p.submit("089999999999", "nobody").await;
    p.wait_for(&job_id, JobStatus::Failed).await;
    assert!(p.factory.driver(0).unwrap().sent().is_empty());
    p.stop().await;
}
