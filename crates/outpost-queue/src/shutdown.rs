// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! SIGTERM and SIGINT (Ctrl+C) cancel a [`CancellationToken`] watched by
//! `serve`. The processor is then stopped with a bounded drain.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::processor::QueueProcessor;

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is received.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            info!("received SIGINT (Ctrl+C), initiating shutdown");
                        }
                        _ = sigterm.recv() => {
                            info!("received SIGTERM, initiating shutdown");
                        }
                        _ = token_clone.cancelled() => return,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler; Ctrl+C only");
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating shutdown"),
                        _ = token_clone.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
                _ = token_clone.cancelled() => return,
            }
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Stops the processor, waiting up to `timeout` for in-flight deliveries.
///
/// Returns `true` if the drain finished in time. Deliveries still running
/// afterwards stay `active` and are reclaimed by the stall detector on the
/// next start.
pub async fn drain_processor(processor: &QueueProcessor, timeout: Duration) -> bool {
    let in_flight = processor.in_flight_count();
    if in_flight > 0 {
        info!(count = in_flight, "draining in-flight deliveries");
    }

    match tokio::time::timeout(timeout, processor.stop()).await {
        Ok(_) => {
            info!("queue drained");
            true
        }
        Err(_) => {
            warn!(
                remaining = processor.in_flight_count(),
                "drain timeout reached; leaving deliveries to the stall detector"
            );
            false
        }
    }
}
