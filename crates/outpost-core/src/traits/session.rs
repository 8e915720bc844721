// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session automation seam: the concrete messaging client behind the channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::OutpostError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ChannelEvent, DeliveryReceipt, SessionHealth};

/// One instance of the external session client.
///
/// Drivers are created fresh for each connection attempt and torn down with
/// [`PluginAdapter::shutdown`]. Lifecycle changes are reported through the
/// [`EventSink`] passed to [`SessionDriver::initialize`].
#[async_trait]
pub trait SessionDriver: PluginAdapter {
    /// Starts the session. Readiness is reported later as [`ChannelEvent::Ready`].
    async fn initialize(&self, events: EventSink) -> Result<(), OutpostError>;

    /// Keep-alive probe.
    async fn session_health(&self) -> Result<SessionHealth, OutpostError>;

    async fn is_registered(&self, chat_id: &str) -> Result<bool, OutpostError>;

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError>;

    /// Whether concurrent `is_registered`/`send_text` calls are safe.
    fn supports_concurrent_sends(&self) -> bool {
        false
    }
}

/// Builds a new driver for each connection attempt.
pub trait DriverFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn SessionDriver>, OutpostError>;
}

/// Persisted pairing credentials for the session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn has_credentials(&self) -> bool;

    /// Removes persisted credentials so the next connect requires pairing.
    async fn purge(&self) -> Result<(), OutpostError>;
}

/// Channel for a driver to report lifecycle events, tagged with the
/// generation of the driver instance that produced them.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, ChannelEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, ChannelEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Delivers an event. Dropped silently once the manager is gone.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.tx.send((self.generation, event));
    }

    pub fn on_pairing(&self, code: impl Into<String>) {
        self.emit(ChannelEvent::PairingRequired { code: code.into() });
    }

    pub fn on_authenticated(&self) {
        self.emit(ChannelEvent::Authenticated);
    }

    pub fn on_ready(&self) {
        self.emit(ChannelEvent::Ready);
    }

    pub fn on_disconnected(&self, reason: impl Into<String>) {
        self.emit(ChannelEvent::Disconnected {
            reason: reason.into(),
        });
    }

    pub fn on_auth_failure(&self, reason: impl Into<String>) {
        self.emit(ChannelEvent::AuthFailure {
            reason: reason.into(),
        });
    }

    pub fn on_low_level_error(&self, message: impl Into<String>) {
        self.emit(ChannelEvent::LowLevelError {
            message: message.into(),
        });
    }
}
