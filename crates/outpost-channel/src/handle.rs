// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery handle handed to the queue processor for one tick.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use outpost_core::{DeliveryHandle, DeliveryReceipt, OutpostError, SessionDriver};

/// Capability-only view of the live session.
///
/// When `gate` is set, validate and send calls from all concurrent
/// dispatches are serialised on it.
pub struct SessionHandle {
    driver: Arc<dyn SessionDriver>,
    gate: Option<Arc<Mutex<()>>>,
}

impl SessionHandle {
    pub fn new(driver: Arc<dyn SessionDriver>, gate: Option<Arc<Mutex<()>>>) -> Self {
        Self { driver, gate }
    }
}

#[async_trait]
impl DeliveryHandle for SessionHandle {
    async fn validate_recipient(&self, chat_id: &str) -> Result<bool, OutpostError> {
        let _guard = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        self.driver.is_registered(chat_id).await
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError> {
        let _guard = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        self.driver.send_text(chat_id, text).await
    }
}
