// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `outpost serve` command implementation.
//!
//! Opens the job store, connects the WhatsApp channel through the bridge,
//! and runs the queue processor, stall detector and optional retention
//! sweep until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use outpost_channel::{ChannelManager, SessionDirStore};
use outpost_config::OutpostConfig;
use outpost_core::{
    CredentialStore, DeliveryChannel, DriverFactory, JobStore, OutpostError, PluginAdapter,
    RecoveryListener,
};
use outpost_queue::shutdown::{drain_processor, install_signal_handler};
use outpost_queue::{QueueEvent, QueueProcessor, RetentionSweeper, StallDetector};
use outpost_storage::{SqliteJobStore, retry_policy};
use outpost_whatsapp::BridgeDriverFactory;

/// Upper bound on waiting for in-flight sends at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the `outpost serve` command.
pub async fn run_serve(config: OutpostConfig) -> Result<(), OutpostError> {
    info!(service = %config.service.name, "starting outpost serve");

    let factory = BridgeDriverFactory::new(&config.whatsapp).map_err(|e| {
        error!(error = %e, "failed to initialize WhatsApp bridge driver");
        eprintln!(
            "error: a session bridge is required. Set whatsapp.bridge_url or OUTPOST_WHATSAPP_BRIDGE_URL"
        );
        e
    })?;

    let store = Arc::new(
        SqliteJobStore::open(config.storage.clone(), retry_policy(&config.queue)).await?,
    );
    let jobs = Arc::clone(&store) as Arc<dyn JobStore>;

    let credentials = Arc::new(SessionDirStore::new(&config.whatsapp.session_dir));
    if !credentials.has_credentials().await {
        info!(
            session_dir = %config.whatsapp.session_dir,
            "no persisted session; pairing will be required"
        );
    }
    let channel = ChannelManager::new(
        config.channel.clone(),
        Arc::new(factory) as Arc<dyn DriverFactory>,
        credentials as Arc<dyn CredentialStore>,
    );

    let processor = QueueProcessor::new(
        Arc::clone(&jobs),
        Arc::clone(&channel) as Arc<dyn DeliveryChannel>,
        config.queue.clone(),
    );
    channel.add_listener(Arc::clone(&processor) as Arc<dyn RecoveryListener>);

    let cancel = install_signal_handler();
    let tasks = TaskTracker::new();

    let stall = StallDetector::for_processor(Arc::clone(&jobs), &processor);
    match stall.sweep().await {
        Ok(report) if report.reclaimed() > 0 => {
            info!(reclaimed = report.reclaimed(), "reclaimed jobs left active by a previous run");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "startup stall sweep failed"),
    }
    tasks.spawn(stall.run(cancel.clone()));

    if let Some(sweeper) = RetentionSweeper::from_config(Arc::clone(&jobs), &config.queue) {
        tasks.spawn(sweeper.run(cancel.clone()));
    } else {
        debug!("retention sweep disabled");
    }

    tasks.spawn(log_queue_events(processor.subscribe(), cancel.clone()));

    if let Err(e) = channel.connect().await {
        error!(error = %e, "channel failed to connect");
        cancel.cancel();
        stop(&processor, &channel, &tasks, store.as_ref()).await;
        return Err(e);
    }
    processor.start().await;

    cancel.cancelled().await;
    info!("shutdown requested");
    stop(&processor, &channel, &tasks, store.as_ref()).await;

    info!("outpost serve shutdown complete");
    Ok(())
}

/// Stops everything in dependency order: the processor drains first so no
/// send outlives the channel, then background tasks, the channel and the store.
async fn stop(
    processor: &QueueProcessor,
    channel: &ChannelManager,
    tasks: &TaskTracker,
    store: &SqliteJobStore,
) {
    drain_processor(processor, DRAIN_TIMEOUT).await;
    tasks.close();
    tasks.wait().await;
    channel.shutdown().await;
    if let Err(e) = store.shutdown().await {
        warn!(error = %e, "failed to checkpoint job store");
    }
}

async fn log_queue_events(
    mut events: tokio::sync::broadcast::Receiver<QueueEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(event = %json, "queue event"),
                Err(e) => warn!(error = %e, "failed to encode queue event"),
            },
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "queue event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
