// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator commands: submit, query and control against the job database.
//!
//! These run without a channel or processor. A `serve` process sharing the
//! database picks up the effects on its next tick.

use std::io::Write;
use std::sync::Arc;

use clap::Subcommand;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use outpost_config::OutpostConfig;
use outpost_core::{JobStatus, JobStore, OutpostError, PluginAdapter, Priority, SubmitRequest};
use outpost_queue::QueueService;
use outpost_storage::{SqliteJobStore, retry_policy};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Submit a message for delivery.
    Enqueue {
        /// Phone number in local (0...) or international form.
        recipient: String,
        body: String,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Hold the job back for this many milliseconds.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        /// Caller-assigned id used for deduplication.
        #[arg(long)]
        message_id: Option<String>,
    },
    /// Show a single job.
    Job { job_id: String },
    /// List jobs in one status, claim-ordered, over `[start, end)`.
    Jobs {
        status: JobStatus,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long, default_value_t = 20)]
        end: usize,
    },
    /// Show job counts per status.
    Stats,
    /// Requeue a failed or paused job with a fresh attempt budget.
    Retry { job_id: String },
    /// Delete a job that is not being delivered.
    Remove { job_id: String },
    /// Park all waiting and delayed jobs.
    Pause,
    /// Release parked jobs.
    Resume,
    /// Delete every job that is not being delivered.
    Clear {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// Delete finished jobs older than the retention window.
    Clean {
        /// Defaults to `queue.retention_hours`.
        #[arg(long)]
        hours: Option<u64>,
    },
}

/// Opens the job store, runs `command` and prints its JSON result to `out`.
pub async fn run(
    command: QueueCommand,
    config: &OutpostConfig,
    out: &mut impl Write,
) -> Result<(), OutpostError> {
    let store = Arc::new(
        SqliteJobStore::open(config.storage.clone(), retry_policy(&config.queue)).await?,
    );
    let service = QueueService::new(Arc::clone(&store) as Arc<dyn JobStore>, config);

    let result = execute(&service, command, config, out).await;
    if let Err(e) = store.shutdown().await {
        warn!(error = %e, "failed to checkpoint job store");
    }
    result
}

async fn execute(
    service: &QueueService,
    command: QueueCommand,
    config: &OutpostConfig,
    out: &mut impl Write,
) -> Result<(), OutpostError> {
    match command {
        QueueCommand::Enqueue {
            recipient,
            body,
            priority,
            delay_ms,
            message_id,
        } => {
            let receipt = service
                .enqueue(SubmitRequest {
                    recipient,
                    body,
                    priority,
                    delay_ms,
                    message_id,
                })
                .await?;
            print_json(out, &receipt)
        }
        QueueCommand::Job { job_id } => match service.get_job(&job_id).await? {
            Some(job) => print_json(out, &job),
            None => Err(OutpostError::Validation(format!("job not found: {job_id}"))),
        },
        QueueCommand::Jobs { status, start, end } => {
            let jobs = service.get_jobs(status, start, end).await?;
            print_json(out, &jobs)
        }
        QueueCommand::Stats => print_json(out, &service.get_stats().await?),
        QueueCommand::Retry { job_id } => print_json(out, &service.retry_job(&job_id).await?),
        QueueCommand::Remove { job_id } => {
            service.remove_job(&job_id).await?;
            print_json(out, &json!({ "removed": job_id }))
        }
        QueueCommand::Pause => print_json(out, &json!({ "paused": service.pause_queue().await? })),
        QueueCommand::Resume => {
            print_json(out, &json!({ "resumed": service.resume_queue().await? }))
        }
        QueueCommand::Clear { yes } => {
            if !yes {
                return Err(OutpostError::Validation(
                    "refusing to clear the queue without --yes".into(),
                ));
            }
            print_json(out, &json!({ "cleared": service.clear_queue().await? }))
        }
        QueueCommand::Clean { hours } => {
            let hours = hours.or(config.queue.retention_hours).ok_or_else(|| {
                OutpostError::Validation(
                    "--hours is required when queue.retention_hours is unset".into(),
                )
            })?;
            print_json(out, &json!({ "removed": service.clean_queue(hours).await? }))
        }
    }
}

fn print_json(out: &mut impl Write, value: &impl Serialize) -> Result<(), OutpostError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| OutpostError::Internal(format!("failed to encode output: {e}")))?;
    writeln!(out, "{text}").map_err(|e| OutpostError::Internal(format!("failed to write output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_config::StorageConfig;

    struct Env {
        config: OutpostConfig,
        _dir: tempfile::TempDir,
    }

    fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let config = OutpostConfig {
            storage: StorageConfig {
                database_path: dir.path().join("ops.db").to_string_lossy().to_string(),
                wal_mode: true,
            },
            ..OutpostConfig::default()
        };
        Env { config, _dir: dir }
    }

    async fn run_json(env: &Env, command: QueueCommand) -> Result<serde_json::Value, OutpostError> {
        let mut out = Vec::new();
        run(command, &env.config, &mut out).await?;
        Ok(serde_json::from_slice(&out).unwrap())
    }

    fn enqueue(recipient: &str) -> QueueCommand {
        QueueCommand::Enqueue {
            recipient: recipient.into(),
            body: "hello".into(),
            priority: Priority::Normal,
            delay_ms: 0,
            message_id: Some("order-42".into()),
        }
    }

    #[tokio::test]
    async fn enqueue_then_query() {
        let env = env();
        let receipt = run_json(&env, enqueue("081234567890")).await.unwrap();
        assert_eq!(receipt["messageId"], "order-42");
        assert_eq!(receipt["status"], "waiting");
        let job_id = receipt["jobId"].as_str().unwrap().to_string();

        let job = run_json(&env, QueueCommand::Job { job_id }).await.unwrap();
        assert_eq!(job["chatId"], "6281234567890@c.us");
        assert_eq!(job["originalRecipient"], "081234567890");

        let stats = run_json(&env, QueueCommand::Stats).await.unwrap();
        assert_eq!(stats["waiting"], 1);
        assert_eq!(stats["total"], 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let env = env();
        run_json(&env, enqueue("081234567890")).await.unwrap();
        let err = run_json(&env, enqueue("081234567890")).await.unwrap_err();
        assert!(matches!(err, OutpostError::DuplicateMessage { .. }));
    }

    #[tokio::test]
    async fn pause_and_resume_report_counts() {
        let env = env();
        run_json(&env, enqueue("081234567890")).await.unwrap();

        let paused = run_json(&env, QueueCommand::Pause).await.unwrap();
        assert_eq!(paused["paused"], 1);
        let listed = run_json(
            &env,
            QueueCommand::Jobs {
                status: JobStatus::Paused,
                start: 0,
                end: 10,
            },
        )
        .await
        .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let resumed = run_json(&env, QueueCommand::Resume).await.unwrap();
        assert_eq!(resumed["resumed"], 1);
    }

    #[tokio::test]
    async fn clear_requires_confirmation() {
        let env = env();
        run_json(&env, enqueue("081234567890")).await.unwrap();

        let err = run_json(&env, QueueCommand::Clear { yes: false }).await.unwrap_err();
        assert!(matches!(err, OutpostError::Validation(_)));

        let cleared = run_json(&env, QueueCommand::Clear { yes: true }).await.unwrap();
        assert_eq!(cleared["cleared"], 1);
    }

    #[tokio::test]
    async fn clean_needs_a_retention_window() {
        let env = env();
        let err = run_json(&env, QueueCommand::Clean { hours: None }).await.unwrap_err();
        assert!(matches!(err, OutpostError::Validation(_)));

        let cleaned = run_json(&env, QueueCommand::Clean { hours: Some(24) }).await.unwrap();
        assert_eq!(cleaned["removed"], 0);
    }

    #[tokio::test]
    async fn missing_job_is_an_error() {
        let env = env();
        let err = run_json(
            &env,
            QueueCommand::Job {
                job_id: "job_missing".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("job_missing"));
    }
}
