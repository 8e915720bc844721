// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stall detector: reclaims jobs left `active` past the stalled timeout.
//!
//! Runs on its own cadence, independent of the dispatch tick. It only
//! touches jobs whose `processed_at` predates `now - stalled_timeout`, and
//! the store re-checks that condition inside the update, so a dispatch
//! finishing within normal latency is never reclaimed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use outpost_config::model::QueueConfig;
use outpost_core::{JobStore, OutpostError, RetryOutcome};

use crate::events::QueueEvent;
use crate::processor::QueueProcessor;

/// Error recorded on a reclaimed job.
pub const STALLED_REASON: &str = "stalled: timeout exceeded";

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rescheduled: usize,
    pub failed: usize,
    /// Finished or reclaimed elsewhere between selection and update.
    pub skipped: usize,
}

impl SweepReport {
    pub fn reclaimed(&self) -> usize {
        self.rescheduled + self.failed
    }
}

pub struct StallDetector {
    store: Arc<dyn JobStore>,
    config: watch::Receiver<QueueConfig>,
    events: broadcast::Sender<QueueEvent>,
}

impl StallDetector {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: watch::Receiver<QueueConfig>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            store,
            config,
            events,
        }
    }

    /// A detector sharing the processor's store view, live config and event stream.
    pub fn for_processor(store: Arc<dyn JobStore>, processor: &QueueProcessor) -> Self {
        Self::new(store, processor.config_watch(), processor.events())
    }

    pub async fn sweep(&self) -> Result<SweepReport, OutpostError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweeps as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, OutpostError> {
        let timeout = self.config.borrow().stalled_timeout();
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| OutpostError::Config(format!("stalled timeout out of range: {e}")))?;
        let cutoff = now - timeout;

        let stalled = self.store.stalled_jobs(cutoff).await?;
        let mut report = SweepReport::default();

        for job in stalled {
            match self
                .store
                .reclaim_stalled(&job.id, cutoff, STALLED_REASON)
                .await
            {
                Ok(Some(RetryOutcome::Rescheduled {
                    attempts,
                    next_retry,
                })) => {
                    report.rescheduled += 1;
                    counter!("outpost_jobs_stalled_total").increment(1);
                    counter!("outpost_jobs_retried_total").increment(1);
                    warn!(
                        job_id = %job.id,
                        attempts,
                        next_retry = %next_retry,
                        "stalled job rescheduled"
                    );
                    let _ = self.events.send(QueueEvent::MessageRetry {
                        job_id: job.id.clone(),
                        attempts,
                        next_retry,
                        error: STALLED_REASON.to_string(),
                    });
                }
                Ok(Some(RetryOutcome::Failed { attempts, reason })) => {
                    report.failed += 1;
                    counter!("outpost_jobs_stalled_total").increment(1);
                    counter!("outpost_jobs_failed_total").increment(1);
                    warn!(job_id = %job.id, attempts, %reason, "stalled job failed");
                    let _ = self.events.send(QueueEvent::MessageFailed {
                        job_id: job.id.clone(),
                        reason,
                        permanent: false,
                    });
                }
                Ok(None) => {
                    report.skipped += 1;
                    debug!(job_id = %job.id, "job settled before reclaim");
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to reclaim stalled job");
                }
            }
        }

        if report.reclaimed() > 0 {
            info!(
                rescheduled = report.rescheduled,
                failed = report.failed,
                "reclaimed stalled jobs"
            );
            let _ = self.events.send(QueueEvent::StalledJobs {
                count: report.reclaimed(),
            });
        }
        Ok(report)
    }

    /// Sweeps every `stall_check_interval_ms` until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let interval = self.config.borrow().stall_check_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = interval.as_millis() as u64,
            "stall detector started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "stall sweep failed");
                    }
                }
            }
        }
        debug!("stall detector stopped");
    }
}
