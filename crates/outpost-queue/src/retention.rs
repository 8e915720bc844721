// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic deletion of finished jobs past the retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use outpost_config::model::QueueConfig;
use outpost_core::JobStore;

pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    retention_hours: u64,
    interval: Duration,
}

impl RetentionSweeper {
    /// `None` when `queue.retention_hours` is unset.
    pub fn from_config(store: Arc<dyn JobStore>, config: &QueueConfig) -> Option<Self> {
        config.retention_hours.map(|retention_hours| Self {
            store,
            retention_hours,
            interval: Duration::from_secs(config.retention_sweep_interval_secs.max(1)),
        })
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            retention_hours = self.retention_hours,
            interval_secs = self.interval.as_secs(),
            "retention sweep enabled"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.store.clean_old_jobs(self.retention_hours).await {
                        Ok(0) => debug!("no expired jobs"),
                        Ok(removed) => info!(removed, "expired jobs removed"),
                        Err(e) => error!(error = %e, "retention sweep failed"),
                    }
                }
            }
        }
    }
}
