// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue processor: drains the job store through the delivery channel
//! under a concurrency budget.
//!
//! A single timer drives the dispatch tick. Each tick claims at most
//! `max_concurrent - in_flight` ready jobs and spawns one task per job
//! without waiting for it. The in-flight set is the only source of truth
//! for the budget, and ticks are serialised so two overlapping ticks can
//! never over-claim.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use outpost_config::model::QueueConfig;
use outpost_config::queue_violations;
use outpost_core::{DeliveryChannel, JobStore, OutpostError, QueueStats, RecoveryListener};

use crate::dispatch::{Dispatcher, InFlight};
use crate::events::{EVENT_BUFFER, QueueEvent};

/// Runtime-adjustable subset of the queue configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub process_interval_ms: Option<u64>,
    #[serde(default)]
    pub stalled_timeout_ms: Option<u64>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_concurrent.is_none()
            && self.process_interval_ms.is_none()
            && self.stalled_timeout_ms.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStats {
    pub is_processing: bool,
    pub currently_processing: usize,
    pub max_concurrent: usize,
    pub process_interval_ms: u64,
    pub stalled_timeout_ms: u64,
    pub queue_stats: QueueStats,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct QueueProcessor {
    store: Arc<dyn JobStore>,
    channel: Arc<dyn DeliveryChannel>,
    config: watch::Sender<QueueConfig>,
    in_flight: InFlight,
    /// Serialises ticks.
    claim_lock: tokio::sync::Mutex<()>,
    running: tokio::sync::Mutex<Option<RunningLoop>>,
    processing: AtomicBool,
    dispatches: TaskTracker,
    events: broadcast::Sender<QueueEvent>,
    weak_self: Weak<QueueProcessor>,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        channel: Arc<dyn DeliveryChannel>,
        config: QueueConfig,
    ) -> Arc<Self> {
        let (config, _) = watch::channel(config);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new_cyclic(|weak_self| Self {
            store,
            channel,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            claim_lock: tokio::sync::Mutex::new(()),
            running: tokio::sync::Mutex::new(None),
            processing: AtomicBool::new(false),
            dispatches: TaskTracker::new(),
            events,
            weak_self: weak_self.clone(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Live view of the queue configuration, including runtime updates.
    pub fn config_watch(&self) -> watch::Receiver<QueueConfig> {
        self.config.subscribe()
    }

    pub fn config(&self) -> QueueConfig {
        self.config.borrow().clone()
    }

    pub(crate) fn events(&self) -> broadcast::Sender<QueueEvent> {
        self.events.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Starts the dispatch timer: one tick immediately, then one per interval.
    ///
    /// Returns `false` (and changes nothing) if the processor is already running.
    pub async fn start(&self) -> bool {
        if !self.launch().await {
            return false;
        }
        let config = self.config();
        info!(
            max_concurrent = config.max_concurrent,
            process_interval_ms = config.process_interval_ms,
            stalled_timeout_ms = config.stalled_timeout_ms,
            "queue processor started"
        );
        let _ = self.events.send(QueueEvent::Started);
        true
    }

    /// Restarts a stopped processor. A no-op while running.
    pub async fn resume(&self) -> bool {
        if !self.launch().await {
            debug!("queue processor already running; resume ignored");
            return false;
        }
        info!("queue processor resumed");
        let _ = self.events.send(QueueEvent::Resumed);
        true
    }

    async fn launch(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return false;
        };
        let token = CancellationToken::new();
        let handle = tokio::spawn(this.run_loop(token.clone()));
        *running = Some(RunningLoop { token, handle });
        self.processing.store(true, Ordering::SeqCst);
        true
    }

    /// Stops scheduling ticks and waits for in-flight dispatches to settle.
    ///
    /// Sends already in progress are never aborted. Returns `false` if the
    /// processor was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        self.processing.store(false, Ordering::SeqCst);
        running.token.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "dispatch loop ended abnormally");
        }

        let pending = self.in_flight_count();
        if pending > 0 {
            info!(pending, "waiting for in-flight deliveries to finish");
        }
        self.dispatches.close();
        self.dispatches.wait().await;
        self.dispatches.reopen();

        info!("queue processor stopped");
        let _ = self.events.send(QueueEvent::Stopped);
        true
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut config_rx = self.config.subscribe();
        let mut interval = config_rx.borrow_and_update().process_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "dispatch tick failed; retrying next tick");
                    }
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = config_rx.borrow_and_update().process_interval();
                    if next != interval {
                        interval = next;
                        ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        debug!(interval_ms = interval.as_millis() as u64, "dispatch timer restarted");
                    }
                }
            }
        }
        debug!("dispatch loop exited");
    }

    /// One dispatch tick. Returns how many jobs were dispatched.
    pub async fn tick(&self) -> Result<usize, OutpostError> {
        let _claim = self.claim_lock.lock().await;

        if !self.channel.is_ready() {
            debug!("channel not ready; skipping tick");
            return Ok(0);
        }
        let Some(handle) = self.channel.delivery_handle() else {
            debug!("no delivery handle; skipping tick");
            return Ok(0);
        };

        let max_concurrent = self.config.borrow().max_concurrent;
        let available = max_concurrent.saturating_sub(self.in_flight_count());
        if available == 0 {
            debug!(max_concurrent, "all delivery slots busy");
            return Ok(0);
        }

        let jobs = self.store.claim_ready(available).await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        let dispatcher = Dispatcher {
            store: Arc::clone(&self.store),
            handle,
            events: self.events.clone(),
            in_flight: Arc::clone(&self.in_flight),
        };

        let mut dispatched = 0;
        for job in jobs {
            let Some(guard) = dispatcher.admit(&job) else {
                warn!(job_id = %job.id, "job already in flight; not dispatching twice");
                continue;
            };
            let dispatcher = dispatcher.clone();
            self.dispatches.spawn(async move {
                let _guard = guard;
                dispatcher.run(job).await;
            });
            dispatched += 1;
        }
        debug!(dispatched, available, "dispatch tick");
        Ok(dispatched)
    }

    /// Runs a tick right away and reports the resulting statistics.
    pub async fn process_now(&self) -> Result<ProcessorStats, OutpostError> {
        self.tick().await?;
        self.stats().await
    }

    pub async fn stats(&self) -> Result<ProcessorStats, OutpostError> {
        let queue_stats = self.store.stats().await?;
        let config = self.config();
        Ok(ProcessorStats {
            is_processing: self.is_processing(),
            currently_processing: self.in_flight_count(),
            max_concurrent: config.max_concurrent,
            process_interval_ms: config.process_interval_ms,
            stalled_timeout_ms: config.stalled_timeout_ms,
            queue_stats,
        })
    }

    /// Validates and applies a runtime configuration change.
    ///
    /// Nothing is applied if any field is out of bounds. The dispatch timer
    /// restarts only when the interval changed.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<QueueConfig, OutpostError> {
        let mut candidate = self.config();
        if let Some(max_concurrent) = update.max_concurrent {
            candidate.max_concurrent = max_concurrent;
        }
        if let Some(interval) = update.process_interval_ms {
            candidate.process_interval_ms = interval;
        }
        if let Some(timeout) = update.stalled_timeout_ms {
            candidate.stalled_timeout_ms = timeout;
        }

        let violations = queue_violations(&candidate);
        if !violations.is_empty() {
            return Err(OutpostError::Config(violations.join("; ")));
        }

        self.config.send_if_modified(|current| {
            if *current == candidate {
                false
            } else {
                *current = candidate.clone();
                true
            }
        });
        info!(
            max_concurrent = candidate.max_concurrent,
            process_interval_ms = candidate.process_interval_ms,
            stalled_timeout_ms = candidate.stalled_timeout_ms,
            "queue configuration updated"
        );
        let _ = self.events.send(QueueEvent::ConfigUpdated {
            max_concurrent: candidate.max_concurrent,
            process_interval_ms: candidate.process_interval_ms,
            stalled_timeout_ms: candidate.stalled_timeout_ms,
        });
        Ok(candidate)
    }
}

#[async_trait]
impl RecoveryListener for QueueProcessor {
    async fn on_recovered(&self) {
        if !self.resume().await {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "post-recovery tick failed");
            }
        }
    }
}
