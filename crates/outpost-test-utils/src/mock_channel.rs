// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock delivery channel for deterministic processor tests.
//!
//! `MockDeliveryChannel` implements `DeliveryChannel` with a readiness
//! switch, scripted validation and send outcomes, captured sends and a
//! high-water mark of concurrent calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use outpost_core::{DeliveryChannel, DeliveryHandle, DeliveryReceipt, OutpostError};

/// Scripted result of a recipient validation.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Registered,
    NotRegistered,
    Error(String),
}

#[derive(Default)]
struct Script {
    validation: HashMap<String, ValidationOutcome>,
    sends: VecDeque<Result<String, String>>,
}

struct Shared {
    script: Mutex<Script>,
    sent: Mutex<Vec<(String, String)>>,
    send_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    receipts: AtomicUsize,
}

/// A mock channel whose handle records sends instead of delivering them.
pub struct MockDeliveryChannel {
    ready: AtomicBool,
    connects: AtomicUsize,
    shared: Arc<Shared>,
}

impl MockDeliveryChannel {
    /// A ready channel that accepts every recipient and send.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            shared: Arc::new(Shared {
                script: Mutex::new(Script::default()),
                sent: Mutex::new(Vec::new()),
                send_delay: Mutex::new(Duration::ZERO),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                receipts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn script_validation(&self, chat_id: &str, outcome: ValidationOutcome) {
        self.shared
            .script
            .lock()
            .await
            .validation
            .insert(chat_id.to_string(), outcome);
    }

    /// Queues the outcome of an upcoming send. `Err` carries the error message.
    pub async fn script_send(&self, outcome: Result<&str, &str>) {
        self.shared.script.lock().await.sends.push_back(
            outcome
                .map(str::to_string)
                .map_err(str::to_string),
        );
    }

    /// How long each send takes. Used to hold dispatches in flight.
    pub async fn set_send_delay(&self, delay: Duration) {
        *self.shared.send_delay.lock().await = delay;
    }

    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.shared.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.shared.sent.lock().await.len()
    }

    /// Highest number of sends observed in flight at once.
    pub fn max_concurrent_sends(&self) -> usize {
        self.shared.high_water.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Default for MockDeliveryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryChannel for MockDeliveryChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn delivery_handle(&self) -> Option<Arc<dyn DeliveryHandle>> {
        self.is_ready().then(|| {
            Arc::new(MockHandle {
                shared: Arc::clone(&self.shared),
            }) as Arc<dyn DeliveryHandle>
        })
    }

    async fn connect(&self) -> Result<(), OutpostError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockHandle {
    shared: Arc<Shared>,
}

#[async_trait]
impl DeliveryHandle for MockHandle {
    async fn validate_recipient(&self, chat_id: &str) -> Result<bool, OutpostError> {
        let outcome = self.shared.script.lock().await.validation.get(chat_id).cloned();
        match outcome.unwrap_or(ValidationOutcome::Registered) {
            ValidationOutcome::Registered => Ok(true),
            ValidationOutcome::NotRegistered => Ok(false),
            ValidationOutcome::Error(message) => Err(OutpostError::channel(message)),
        }
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError> {
        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.high_water.fetch_max(now, Ordering::SeqCst);

        let delay = *self.shared.send_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.shared.script.lock().await.sends.pop_front();
        let result = match scripted {
            Some(Err(message)) => Err(OutpostError::channel(message)),
            Some(Ok(receipt)) => Ok(DeliveryReceipt(receipt)),
            None => {
                let n = self.shared.receipts.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(DeliveryReceipt(format!("mock-msg-{n}")))
            }
        };
        if result.is_ok() {
            self.shared
                .sent
                .lock()
                .await
                .push((chat_id.to_string(), text.to_string()));
        }

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_only_while_ready() {
        let channel = MockDeliveryChannel::new();
        assert!(channel.delivery_handle().is_some());

        channel.set_ready(false);
        assert!(channel.delivery_handle().is_none());

        channel.connect().await.unwrap();
        assert!(channel.is_ready());
        assert_eq!(channel.connect_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_outcomes_apply_in_order() {
        let channel = MockDeliveryChannel::new();
        channel.script_send(Err("Session closed")).await;
        channel.script_send(Ok("wamid-1")).await;
        channel
            .script_validation("bad@c.us", ValidationOutcome::NotRegistered)
            .await;

        let handle = channel.delivery_handle().unwrap();
        assert!(!handle.validate_recipient("bad@c.us").await.unwrap());
        assert!(handle.validate_recipient("good@c.us").await.unwrap());

        assert!(handle.send("good@c.us", "one").await.is_err());
        assert_eq!(handle.send("good@c.us", "two").await.unwrap().0, "wamid-1");
        assert_eq!(handle.send("good@c.us", "three").await.unwrap().0, "mock-msg-1");
        assert_eq!(channel.sent_count().await, 2);
    }

    #[tokio::test]
    async fn high_water_tracks_overlapping_sends() {
        let channel = MockDeliveryChannel::new();
        channel.set_send_delay(Duration::from_millis(20)).await;
        let handle = channel.delivery_handle().unwrap();

        let (a, b) = tokio::join!(handle.send("a@c.us", "x"), handle.send("b@c.us", "y"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(channel.max_concurrent_sends(), 2);
    }
}
