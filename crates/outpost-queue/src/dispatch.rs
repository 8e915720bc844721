// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-job delivery: validate the recipient, send, record the outcome.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use metrics::counter;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use outpost_core::retry::is_recipient_rejection;
use outpost_core::types::format_timestamp;
use outpost_core::{
    DeliveryHandle, DeliveryReceipt, ErrorClass, Job, JobStore, OutpostError, RetryOutcome,
    classify,
};

use crate::events::QueueEvent;

pub const PROGRESS_STARTED: i64 = 10;
pub const PROGRESS_VALIDATING: i64 = 30;
pub const PROGRESS_SENDING: i64 = 60;
pub const PROGRESS_SENT: i64 = 100;

/// Ids of jobs currently being dispatched by this process.
pub type InFlight = Arc<Mutex<HashSet<String>>>;

/// Removes the job from the in-flight set when the dispatch ends, however it ends.
pub(crate) struct InFlightGuard {
    in_flight: InFlight,
    job_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Why a delivery attempt failed and how the job machinery must treat it.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub error: OutpostError,
    pub class: ErrorClass,
}

impl DeliveryFailure {
    fn classified(error: OutpostError) -> Self {
        let class = classify(&error);
        Self { error, class }
    }

    fn retryable(error: OutpostError) -> Self {
        Self {
            error,
            class: ErrorClass::Transient,
        }
    }
}

/// Everything one dispatch task needs. Cheap to clone per job.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) handle: Arc<dyn DeliveryHandle>,
    pub(crate) events: broadcast::Sender<QueueEvent>,
    pub(crate) in_flight: InFlight,
}

impl Dispatcher {
    /// Registers `job` as in flight. Returns `None` if it already is.
    pub(crate) fn admit(&self, job: &Job) -> Option<InFlightGuard> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id.clone());
        inserted.then(|| InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            job_id: job.id.clone(),
        })
    }

    /// Delivers one claimed job and records the outcome in the store.
    pub async fn run(&self, job: Job) {
        info!(
            job_id = %job.id,
            message_id = %job.message_id,
            recipient = %job.formatted_recipient,
            attempt = job.attempts + 1,
            "processing message"
        );
        debug!(job_id = %job.id, body = %job.body_preview(), "message body");

        match self.deliver(&job).await {
            Ok(receipt) => self.complete(&job, receipt).await,
            Err(failure) => self.fail(&job, failure).await,
        }
    }

    async fn deliver(&self, job: &Job) -> Result<DeliveryReceipt, DeliveryFailure> {
        self.progress(job, PROGRESS_STARTED).await;
        self.progress(job, PROGRESS_VALIDATING).await;

        match self.handle.validate_recipient(&job.chat_id).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(DeliveryFailure::classified(
                    OutpostError::RecipientNotRegistered {
                        recipient: job.formatted_recipient.clone(),
                    },
                ));
            }
            Err(e) if is_recipient_rejection(&e.to_string()) => {
                debug!(job_id = %job.id, error = %e, "recipient rejected by channel");
                return Err(DeliveryFailure::classified(
                    OutpostError::RecipientNotRegistered {
                        recipient: job.formatted_recipient.clone(),
                    },
                ));
            }
            Err(e) => return Err(DeliveryFailure::retryable(e)),
        }

        self.progress(job, PROGRESS_SENDING).await;
        let receipt = self
            .handle
            .send(&job.chat_id, &job.body)
            .await
            .map_err(DeliveryFailure::classified)?;
        self.progress(job, PROGRESS_SENT).await;
        Ok(receipt)
    }

    async fn progress(&self, job: &Job, progress: i64) {
        if let Err(e) = self.store.update_progress(&job.id, progress).await {
            debug!(job_id = %job.id, progress, error = %e, "progress update failed");
        }
    }

    async fn complete(&self, job: &Job, receipt: DeliveryReceipt) {
        let result = json!({
            "success": true,
            "messageId": job.message_id,
            "sentMessageId": receipt.0,
            "to": job.formatted_recipient,
            "timestamp": format_timestamp(Utc::now()),
        });

        match self.store.mark_completed(&job.id, result).await {
            Ok(true) => {
                counter!("outpost_jobs_completed_total").increment(1);
                info!(
                    job_id = %job.id,
                    message_id = %job.message_id,
                    receipt = %receipt.0,
                    "message sent"
                );
                let _ = self.events.send(QueueEvent::MessageSent {
                    job_id: job.id.clone(),
                    message_id: job.message_id.clone(),
                    receipt: receipt.0,
                });
            }
            Ok(false) => {
                warn!(job_id = %job.id, "message sent but job already finished or removed");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record delivery");
            }
        }
    }

    async fn fail(&self, job: &Job, failure: DeliveryFailure) {
        let reason = failure.error.to_string();
        match failure.class {
            ErrorClass::Permanent => self.fail_permanently(job, &reason).await,
            ErrorClass::Transient => self.retry_later(job, &reason).await,
        }
    }

    async fn fail_permanently(&self, job: &Job, reason: &str) {
        match self.store.mark_failed(&job.id, reason).await {
            Ok(true) => {
                counter!("outpost_jobs_failed_total").increment(1);
                warn!(job_id = %job.id, reason, "message failed permanently");
                let _ = self.events.send(QueueEvent::MessageFailed {
                    job_id: job.id.clone(),
                    reason: reason.to_string(),
                    permanent: true,
                });
            }
            Ok(false) => debug!(job_id = %job.id, "job already finished; failure ignored"),
            Err(e) => error!(job_id = %job.id, error = %e, "failed to record permanent failure"),
        }
    }

    async fn retry_later(&self, job: &Job, reason: &str) {
        match self.store.increment_attempts(&job.id, reason).await {
            Ok(Some(RetryOutcome::Rescheduled {
                attempts,
                next_retry,
            })) => {
                counter!("outpost_jobs_retried_total").increment(1);
                warn!(
                    job_id = %job.id,
                    attempts,
                    max_attempts = job.max_attempts,
                    next_retry = %next_retry,
                    error = reason,
                    "retryable delivery error"
                );
                let _ = self.events.send(QueueEvent::MessageRetry {
                    job_id: job.id.clone(),
                    attempts,
                    next_retry,
                    error: reason.to_string(),
                });
            }
            Ok(Some(RetryOutcome::Failed { attempts, reason })) => {
                counter!("outpost_jobs_failed_total").increment(1);
                warn!(job_id = %job.id, attempts, %reason, "message failed after retries");
                let _ = self.events.send(QueueEvent::MessageFailed {
                    job_id: job.id.clone(),
                    reason,
                    permanent: false,
                });
            }
            Ok(None) => {
                debug!(job_id = %job.id, "job no longer active; retry not recorded");
            }
            Err(e) => error!(job_id = %job.id, error = %e, "failed to record retry"),
        }
    }
}
