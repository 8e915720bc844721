// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capabilities the queue processor borrows from the channel lifecycle manager.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OutpostError;
use crate::types::DeliveryReceipt;

/// Send capability for one live session. Never outlives a processor tick.
#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    /// Whether `chat_id` is a deliverable endpoint on the channel.
    ///
    /// `Ok(false)` is a permanent rejection. Errors carry the channel's own
    /// message and are classified by the caller.
    async fn validate_recipient(&self, chat_id: &str) -> Result<bool, OutpostError>;

    async fn send(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError>;
}

/// Read-only view of the channel consumed by the processor.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn is_ready(&self) -> bool;

    /// A usable handle, only while the channel is ready.
    fn delivery_handle(&self) -> Option<Arc<dyn DeliveryHandle>>;

    /// Starts the session if it is idle. No-op while initializing or ready.
    async fn connect(&self) -> Result<(), OutpostError>;
}

/// Notified after the channel reconnects on its own.
#[async_trait]
pub trait RecoveryListener: Send + Sync {
    async fn on_recovered(&self);
}
