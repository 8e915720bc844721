// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock session driver, driver factory and credential store.
//!
//! `MockDriverFactory` records every driver it builds so tests can reach
//! the live session, push lifecycle events through its sink and script its
//! health, registration and send outcomes.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use outpost_core::{
    AdapterType, ChannelEvent, CredentialStore, DeliveryReceipt, DriverFactory, EventSink,
    HealthStatus, OutpostError, PluginAdapter, SessionDriver, SessionHealth,
};

/// How a driver behaves while it starts and stops.
#[derive(Debug, Clone, Default)]
struct Script {
    auto_ready: bool,
    init_error: Option<String>,
    concurrent: bool,
    /// Emitted from `initialize` after the ready events.
    init_events: Vec<ChannelEvent>,
    init_delay: Duration,
    shutdown_delay: Duration,
}

/// A scripted session driver.
pub struct MockSessionDriver {
    script: Script,
    sink: Mutex<Option<EventSink>>,
    health: Mutex<Result<SessionHealth, String>>,
    unregistered: Mutex<HashSet<String>>,
    send_failures: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<(String, String)>>,
    probes: AtomicUsize,
    shut_down: AtomicBool,
}

impl MockSessionDriver {
    /// A driver that reports ready as soon as it is initialized.
    pub fn new() -> Self {
        Self::scripted(Script {
            auto_ready: true,
            ..Script::default()
        })
    }

    fn scripted(script: Script) -> Self {
        Self {
            script,
            sink: Mutex::new(None),
            health: Mutex::new(Ok(SessionHealth::Connected)),
            unregistered: Mutex::new(HashSet::new()),
            send_failures: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Pushes an event through the sink handed to `initialize`.
    pub fn emit(&self, event: ChannelEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.emit(event);
        }
    }

    pub fn generation(&self) -> Option<u64> {
        self.sink.lock().unwrap().as_ref().map(EventSink::generation)
    }

    pub fn set_health(&self, health: Result<SessionHealth, String>) {
        *self.health.lock().unwrap() = health;
    }

    pub fn mark_unregistered(&self, chat_id: &str) {
        self.unregistered.lock().unwrap().insert(chat_id.to_string());
    }

    /// The next send fails with `message`.
    pub fn fail_next_send(&self, message: &str) {
        self.send_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for MockSessionDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockSessionDriver {
    fn name(&self) -> &str {
        "mock-session"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, OutpostError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), OutpostError> {
        if !self.script.shutdown_delay.is_zero() {
            tokio::time::sleep(self.script.shutdown_delay).await;
        }
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SessionDriver for MockSessionDriver {
    async fn initialize(&self, events: EventSink) -> Result<(), OutpostError> {
        *self.sink.lock().unwrap() = Some(events.clone());
        if let Some(message) = &self.script.init_error {
            return Err(OutpostError::channel(message.clone()));
        }
        if self.script.auto_ready {
            events.on_authenticated();
            events.on_ready();
        }
        for event in &self.script.init_events {
            events.emit(event.clone());
        }
        if !self.script.init_delay.is_zero() {
            tokio::time::sleep(self.script.init_delay).await;
        }
        Ok(())
    }

    async fn session_health(&self) -> Result<SessionHealth, OutpostError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.health
            .lock()
            .unwrap()
            .clone()
            .map_err(OutpostError::channel)
    }

    async fn is_registered(&self, chat_id: &str) -> Result<bool, OutpostError> {
        Ok(!self.unregistered.lock().unwrap().contains(chat_id))
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError> {
        if let Some(message) = self.send_failures.lock().unwrap().pop_front() {
            return Err(OutpostError::channel(message));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id.to_string(), text.to_string()));
        Ok(DeliveryReceipt(format!("mock-receipt-{}", sent.len())))
    }

    fn supports_concurrent_sends(&self) -> bool {
        self.script.concurrent
    }
}

/// Factory that hands out [`MockSessionDriver`]s and keeps them for inspection.
pub struct MockDriverFactory {
    auto_ready: AtomicBool,
    failing_inits: AtomicUsize,
    concurrent: bool,
    next_init_events: Mutex<Vec<ChannelEvent>>,
    init_delay: Mutex<Duration>,
    shutdown_delay: Mutex<Duration>,
    created: Mutex<Vec<Arc<MockSessionDriver>>>,
}

impl MockDriverFactory {
    pub fn new() -> Self {
        Self {
            auto_ready: AtomicBool::new(true),
            failing_inits: AtomicUsize::new(0),
            concurrent: false,
            next_init_events: Mutex::new(Vec::new()),
            init_delay: Mutex::new(Duration::ZERO),
            shutdown_delay: Mutex::new(Duration::ZERO),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Drivers built by this factory report concurrent sends as safe.
    pub fn concurrent() -> Self {
        Self {
            concurrent: true,
            ..Self::new()
        }
    }

    /// Whether new drivers report ready from `initialize`.
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.auto_ready.store(auto_ready, Ordering::SeqCst);
    }

    /// The next `count` drivers fail to initialize.
    pub fn fail_next_inits(&self, count: usize) {
        self.failing_inits.store(count, Ordering::SeqCst);
    }

    /// The next driver emits `event` from inside `initialize`.
    pub fn emit_on_next_init(&self, event: ChannelEvent) {
        self.next_init_events.lock().unwrap().push(event);
    }

    /// New drivers hold `initialize` open for `delay` after emitting their events.
    pub fn set_init_delay(&self, delay: Duration) {
        *self.init_delay.lock().unwrap() = delay;
    }

    /// New drivers take `delay` to shut down.
    pub fn set_shutdown_delay(&self, delay: Duration) {
        *self.shutdown_delay.lock().unwrap() = delay;
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn latest(&self) -> Option<Arc<MockSessionDriver>> {
        self.created.lock().unwrap().last().cloned()
    }

    pub fn driver(&self, index: usize) -> Option<Arc<MockSessionDriver>> {
        self.created.lock().unwrap().get(index).cloned()
    }
}

impl Default for MockDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for MockDriverFactory {
    fn create(&self) -> Result<Arc<dyn SessionDriver>, OutpostError> {
        let fail = self
            .failing_inits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let driver = Arc::new(MockSessionDriver::scripted(Script {
            auto_ready: self.auto_ready.load(Ordering::SeqCst),
            init_error: fail.then(|| "net::ERR_CONNECTION_REFUSED".to_string()),
            concurrent: self.concurrent,
            init_events: std::mem::take(&mut *self.next_init_events.lock().unwrap()),
            init_delay: *self.init_delay.lock().unwrap(),
            shutdown_delay: *self.shutdown_delay.lock().unwrap(),
        }));
        self.created.lock().unwrap().push(Arc::clone(&driver));
        Ok(driver)
    }
}

/// In-memory credential store counting purges.
pub struct MockCredentialStore {
    present: AtomicBool,
    purges: AtomicUsize,
}

impl MockCredentialStore {
    /// A store that starts with credentials present.
    pub fn paired() -> Self {
        Self {
            present: AtomicBool::new(true),
            purges: AtomicUsize::new(0),
        }
    }

    pub fn purge_count(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }
}

impl Default for MockCredentialStore {
    fn default() -> Self {
        Self::paired()
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn has_credentials(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    async fn purge(&self) -> Result<(), OutpostError> {
        self.present.store(false, Ordering::SeqCst);
        self.purges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn auto_ready_driver_reports_authenticated_then_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = MockSessionDriver::new();
        driver.initialize(EventSink::new(3, tx)).await.unwrap();

        assert_eq!(rx.recv().await, Some((3, ChannelEvent::Authenticated)));
        assert_eq!(rx.recv().await, Some((3, ChannelEvent::Ready)));
        assert_eq!(driver.generation(), Some(3));
    }

    #[tokio::test]
    async fn scripted_send_failure_is_consumed_once() {
        let driver = MockSessionDriver::new();
        driver.fail_next_send("Session closed");

        assert!(driver.send_text("a@c.us", "x").await.is_err());
        let receipt = driver.send_text("a@c.us", "y").await.unwrap();
        assert_eq!(receipt.0, "mock-receipt-1");
        assert_eq!(driver.sent().len(), 1);
    }

    #[tokio::test]
    async fn factory_fails_requested_number_of_inits() {
        let factory = MockDriverFactory::new();
        factory.fail_next_inits(1);
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = factory.create().unwrap();
        assert!(first.initialize(EventSink::new(1, tx.clone())).await.is_err());
        let second = factory.create().unwrap();
        assert!(second.initialize(EventSink::new(2, tx)).await.is_ok());
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test]
    async fn credential_purge_is_counted() {
        let store = MockCredentialStore::paired();
        assert!(store.has_credentials().await);
        store.purge().await.unwrap();
        assert!(!store.has_credentials().await);
        assert_eq!(store.purge_count(), 1);
    }
}
