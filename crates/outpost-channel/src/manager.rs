// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel lifecycle manager and recovery coordinator.
//!
//! [`ChannelManager`] owns the single delivery session: it builds drivers
//! through a [`DriverFactory`], consumes their lifecycle events, probes the
//! live session on a fixed interval and reconnects after recoverable
//! failures. The queue processor sees it only through [`DeliveryChannel`].
//!
//! Every driver instance gets a generation number. Events and probe results
//! from a generation that is no longer installed are dropped, so a torn-down
//! session can never move the state machine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use outpost_config::model::ChannelConfig;
use outpost_core::{
    ChannelEvent, ConnectionState, CredentialStore, DeliveryChannel, DeliveryHandle,
    DriverFactory, EventSink, OutpostError, RecoveryListener, SessionDriver,
};

use crate::handle::SessionHandle;
use crate::transition::{self, Action, ProbeVerdict, RecoveryCause, Transition};

/// Snapshot of the channel for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub is_ready: bool,
    pub pairing_pending: bool,
    pub pairing_code: Option<String>,
    pub last_reason: Option<String>,
    pub recovering: bool,
    pub generation: u64,
}

#[derive(Default)]
struct Inner {
    driver: Option<(u64, Arc<dyn SessionDriver>)>,
    keepalive: Option<CancellationToken>,
    recovery: Option<CancellationToken>,
    pairing_code: Option<String>,
    last_reason: Option<String>,
    /// Failure reported by the new session while a reconnect attempt is in flight.
    pending_failure: Option<String>,
}

pub struct ChannelManager {
    config: ChannelConfig,
    factory: Arc<dyn DriverFactory>,
    credentials: Arc<dyn CredentialStore>,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    generation: AtomicU64,
    /// Recovery guard. Only one recovery episode runs at a time.
    recovering: AtomicBool,
    events_tx: mpsc::UnboundedSender<(u64, ChannelEvent)>,
    listeners: RwLock<Vec<Arc<dyn RecoveryListener>>>,
    send_gate: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    weak_self: Weak<ChannelManager>,
}

impl ChannelManager {
    /// Creates an idle manager and starts its event pump.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: ChannelConfig,
        factory: Arc<dyn DriverFactory>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        let manager = Arc::new_cyclic(|weak_self| Self {
            config,
            factory,
            credentials,
            state_tx,
            inner: Mutex::new(Inner::default()),
            generation: AtomicU64::new(0),
            recovering: AtomicBool::new(false),
            events_tx,
            listeners: RwLock::new(Vec::new()),
            send_gate: Arc::new(tokio::sync::Mutex::new(())),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            weak_self: weak_self.clone(),
        });
        manager.spawn_event_pump(events_rx);
        manager
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ChannelStatus {
        let state = self.state();
        let inner = self.lock();
        ChannelStatus {
            state,
            is_ready: state == ConnectionState::Ready && inner.driver.is_some(),
            pairing_pending: inner.pairing_code.is_some(),
            pairing_code: inner.pairing_code.clone(),
            last_reason: inner.last_reason.clone(),
            recovering: self.is_recovering(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Registers a listener notified after every successful recovery.
    pub fn add_listener(&self, listener: Arc<dyn RecoveryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Starts a session if the channel is idle or sitting in a failure state.
    ///
    /// A no-op while initializing, ready or while a recovery episode owns the
    /// session. Fails once the channel is `failed` (use
    /// [`ChannelManager::reset`]) or shut down.
    pub async fn connect(&self) -> Result<(), OutpostError> {
        if self.shutdown.is_cancelled() {
            return Err(OutpostError::NotReady("channel is shut down".into()));
        }

        let mut refused = None;
        let claimed = self.state_tx.send_if_modified(|state| match *state {
            current if self.recovering.load(Ordering::SeqCst) => {
                refused = Some(current);
                false
            }
            ConnectionState::Idle
            | ConnectionState::Disconnected
            | ConnectionState::AuthFailed
            | ConnectionState::Error => {
                *state = ConnectionState::Initializing;
                true
            }
            other => {
                refused = Some(other);
                false
            }
        });

        match refused {
            _ if claimed => self
                .establish(ConnectionState::Error)
                .await
                .map(|_| ()),
            Some(ConnectionState::Failed) => Err(OutpostError::NotReady(
                "channel recovery failed; reset required".into(),
            )),
            Some(state) => {
                debug!(%state, "connect ignored: session owned elsewhere");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Operator intervention: drop the session and its credentials, then
    /// connect from scratch. Clears a `failed` channel.
    pub async fn reset(&self) -> Result<(), OutpostError> {
        info!("resetting channel session");
        {
            let mut inner = self.lock();
            if let Some(token) = inner.recovery.take() {
                token.cancel();
            }
            inner.pairing_code = None;
            inner.last_reason = None;
            inner.pending_failure = None;
            self.recovering.store(false, Ordering::SeqCst);
        }
        self.teardown_driver(None).await;
        if let Err(e) = self.credentials.purge().await {
            warn!(error = %e, "failed to purge session credentials during reset");
        }
        self.set_state(ConnectionState::Idle);
        self.connect().await
    }

    /// Stops probing and recovery, tears the session down and waits for
    /// background tasks to finish.
    pub async fn shutdown(&self) {
        info!("shutting down channel");
        self.shutdown.cancel();
        self.teardown_driver(None).await;
        self.recovering.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Idle);
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "channel state changed");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(self.lock().driver, Some((g, _)) if g == generation)
    }

    fn spawn_event_pump(&self, mut rx: mpsc::UnboundedReceiver<(u64, ChannelEvent)>) {
        let weak = self.weak_self.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => next,
                };
                let Some((generation, event)) = next else {
                    break;
                };
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.handle_event(generation, event).await;
            }
            debug!("channel event pump stopped");
        });
    }

    async fn handle_event(&self, generation: u64, event: ChannelEvent) {
        if !self.is_current(generation) {
            debug!(generation, ?event, "ignoring event from stale session");
            return;
        }
        let transition = transition::on_event(self.state(), &event);
        self.apply(generation, transition).await;
    }

    async fn apply(&self, generation: u64, transition: Transition) {
        match transition.action {
            Action::None => self.set_state(transition.state),
            Action::RecordPairing(code) => {
                info!(generation, "pairing required; link the session from the phone app");
                self.lock().pairing_code = Some(code);
            }
            Action::StartKeepalive => {
                {
                    let mut inner = self.lock();
                    inner.pairing_code = None;
                    inner.last_reason = None;
                }
                self.set_state(ConnectionState::Ready);
                self.start_keepalive(generation);
            }
            Action::Recover {
                cause,
                purge_credentials,
                reason,
            } => {
                if self.defer_if_recovering(&reason) {
                    return;
                }
                self.begin_recovery(transition.state, cause, purge_credentials, reason)
                    .await;
            }
            Action::AwaitReset { reason } => {
                if self.defer_if_recovering(&reason) {
                    return;
                }
                warn!(
                    generation,
                    state = %transition.state,
                    %reason,
                    "unrecognised channel failure; waiting for reset"
                );
                {
                    let mut inner = self.lock();
                    inner.last_reason = Some(reason);
                    if let Some(token) = inner.keepalive.take() {
                        token.cancel();
                    }
                }
                self.set_state(transition.state);
            }
        }
    }

    /// While a recovery episode runs, failures of the new session are parked
    /// for the reconnect loop instead of starting a second episode.
    fn defer_if_recovering(&self, reason: &str) -> bool {
        let mut inner = self.lock();
        if self.recovering.load(Ordering::SeqCst) {
            debug!(reason, "recovery in progress; failure deferred");
            inner.pending_failure = Some(reason.to_string());
            true
        } else {
            false
        }
    }

    /// Builds, registers and initializes a fresh driver. The state is
    /// `initializing` on entry; on failure it becomes `on_failure`.
    async fn establish(&self, on_failure: ConnectionState) -> Result<u64, OutpostError> {
        self.teardown_driver(None).await;
        self.set_state(ConnectionState::Initializing);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let driver = match self.factory.create() {
            Ok(driver) => driver,
            Err(e) => {
                error!(generation, error = %e, "failed to create session driver");
                self.lock().last_reason = Some(e.to_string());
                self.set_state(on_failure);
                return Err(e);
            }
        };
        self.lock().driver = Some((generation, Arc::clone(&driver)));

        info!(generation, driver = driver.name(), "connecting channel");
        let sink = EventSink::new(generation, self.events_tx.clone());
        let init_timeout = self.config.init_timeout();
        let err = match tokio::time::timeout(init_timeout, driver.initialize(sink)).await {
            Ok(Ok(())) => {
                debug!(generation, "session driver initialized");
                return Ok(generation);
            }
            Ok(Err(e)) => e,
            Err(_) => OutpostError::Timeout {
                duration: init_timeout,
            },
        };

        error!(generation, error = %err, "channel initialization failed");
        self.teardown_driver(Some(generation)).await;
        self.lock().last_reason = Some(err.to_string());
        self.set_state(on_failure);
        Err(err)
    }

    /// Removes the installed driver (only if it belongs to `generation`, when
    /// given) and shuts it down. Errors are logged, never returned.
    async fn teardown_driver(&self, generation: Option<u64>) {
        let removed = {
            let mut inner = self.lock();
            let matches = match (&inner.driver, generation) {
                (Some((installed, _)), Some(wanted)) => *installed == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if matches {
                if let Some(token) = inner.keepalive.take() {
                    token.cancel();
                }
                inner.driver.take()
            } else {
                None
            }
        };

        let Some((generation, driver)) = removed else {
            return;
        };
        match tokio::time::timeout(self.config.probe_timeout(), driver.shutdown()).await {
            Ok(Ok(())) => debug!(generation, "session driver torn down"),
            Ok(Err(e)) => warn!(generation, error = %e, "session driver teardown failed"),
            Err(_) => warn!(generation, "session driver teardown timed out"),
        }
    }

    fn recovery_delay(&self, cause: RecoveryCause) -> Duration {
        match cause {
            RecoveryCause::AuthFailure => self.config.auth_failure_recovery_delay(),
            RecoveryCause::Disconnected
            | RecoveryCause::LowLevelError
            | RecoveryCause::ProbeFailure => self.config.disconnect_recovery_delay(),
        }
    }

    /// Claims the recovery guard, then publishes `failed_state`. `connect()`
    /// refuses while the guard is held.
    async fn begin_recovery(
        &self,
        failed_state: ConnectionState,
        cause: RecoveryCause,
        purge_credentials: bool,
        reason: String,
    ) {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%reason, "recovery already in progress; ignoring");
            return;
        }
        self.set_state(failed_state);

        warn!(?cause, %reason, purge_credentials, "channel lost; starting recovery");
        {
            let mut inner = self.lock();
            inner.last_reason = Some(reason);
            inner.pending_failure = None;
        }
        self.teardown_driver(None).await;

        if purge_credentials && let Err(e) = self.credentials.purge().await {
            warn!(error = %e, "failed to purge session credentials");
        }

        self.set_state(ConnectionState::Recovering);
        counter!("outpost_channel_recoveries_total").increment(1);

        let Some(manager) = self.weak_self.upgrade() else {
            return;
        };
        let token = self.shutdown.child_token();
        if let Some(previous) = self.lock().recovery.replace(token.clone()) {
            previous.cancel();
        }
        let delay = self.recovery_delay(cause);
        self.tasks
            .spawn(async move { manager.run_recovery(delay, token).await });
    }

    async fn run_recovery(self: Arc<Self>, first_delay: Duration, token: CancellationToken) {
        let max_attempts = self.config.max_recovery_attempts.max(1);

        for attempt in 1..=max_attempts {
            let delay = if attempt == 1 {
                first_delay
            } else {
                self.config.retry_recovery_delay()
            };
            info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("recovery cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.lock().pending_failure = None;
            let outcome = match self.establish(ConnectionState::Recovering).await {
                Ok(generation) if token.is_cancelled() => {
                    self.teardown_driver(Some(generation)).await;
                    return;
                }
                Ok(generation) => {
                    let mut inner = self.lock();
                    match inner.pending_failure.take() {
                        Some(reason) => Err((Some(generation), reason)),
                        None => {
                            inner.recovery = None;
                            self.recovering.store(false, Ordering::SeqCst);
                            Ok(generation)
                        }
                    }
                }
                Err(e) => Err((None, e.to_string())),
            };

            match outcome {
                Ok(generation) => {
                    info!(attempt, generation, "channel recovered");
                    self.notify_recovered().await;
                    return;
                }
                Err((generation, reason)) => {
                    warn!(attempt, max_attempts, %reason, "reconnect attempt failed");
                    if let Some(generation) = generation {
                        self.teardown_driver(Some(generation)).await;
                    }
                    self.lock().last_reason = Some(reason);
                    self.set_state(ConnectionState::Recovering);
                }
            }
        }

        if token.is_cancelled() {
            return;
        }
        error!(max_attempts, "channel recovery exhausted; reset required");
        {
            let mut inner = self.lock();
            inner.recovery = None;
            self.recovering.store(false, Ordering::SeqCst);
        }
        self.set_state(ConnectionState::Failed);
    }

    async fn notify_recovered(&self) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_recovered().await;
        }
    }

    fn start_keepalive(&self, generation: u64) {
        let token = self.shutdown.child_token();
        let driver = {
            let mut inner = self.lock();
            let driver = match &inner.driver {
                Some((g, driver)) if *g == generation => Arc::clone(driver),
                _ => return,
            };
            if let Some(previous) = inner.keepalive.replace(token.clone()) {
                previous.cancel();
            }
            driver
        };

        let weak = self.weak_self.clone();
        let interval = self.config.keepalive_interval();
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if !manager.probe(generation, &driver).await {
                    break;
                }
            }
            debug!(generation, "keep-alive stopped");
        });
    }

    /// One keep-alive probe. Returns whether probing should continue.
    async fn probe(&self, generation: u64, driver: &Arc<dyn SessionDriver>) -> bool {
        let result = tokio::time::timeout(self.config.probe_timeout(), driver.session_health()).await;
        let verdict = match &result {
            Ok(Ok(health)) => transition::on_probe(Ok(health)),
            Ok(Err(e)) => transition::on_probe(Err(e.to_string().as_str())),
            Err(_) => transition::on_probe(Err("keep-alive probe timed out")),
        };

        match verdict {
            ProbeVerdict::Healthy => {
                debug!(generation, "keep-alive ok");
                true
            }
            ProbeVerdict::Ignore(message) => {
                warn!(generation, error = %message, "keep-alive probe failed");
                true
            }
            ProbeVerdict::Recover(transition) => {
                if !self.is_current(generation) || self.state() != ConnectionState::Ready {
                    return false;
                }
                self.apply(generation, transition).await;
                false
            }
        }
    }
}

#[async_trait]
impl DeliveryChannel for ChannelManager {
    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready && self.lock().driver.is_some()
    }

    fn delivery_handle(&self) -> Option<Arc<dyn DeliveryHandle>> {
        if self.state() != ConnectionState::Ready {
            return None;
        }
        let driver = self.lock().driver.as_ref().map(|(_, d)| Arc::clone(d))?;
        let gate = (self.config.serialize_sends || !driver.supports_concurrent_sends())
            .then(|| Arc::clone(&self.send_gate));
        Some(Arc::new(SessionHandle::new(driver, gate)))
    }

    async fn connect(&self) -> Result<(), OutpostError> {
        ChannelManager::connect(self).await
    }
}
