// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`SessionDriver`] backed by the HTTP session bridge.
//!
//! The bridge has no push channel, so lifecycle events are derived by
//! polling `GET /session/status`. Polling ends after the first event that
//! takes the session out of service; the channel manager replaces the
//! driver from there. A poll that fails in transit is logged and retried on
//! the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use outpost_config::model::WhatsAppConfig;
use outpost_core::{
    AdapterType, ChannelEvent, DeliveryReceipt, DriverFactory, EventSink, HealthStatus,
    OutpostError, PluginAdapter, SessionDriver, SessionHealth,
};

use crate::client::BridgeClient;
use crate::types::SessionStatus;

/// What one status poll means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Observation {
    Continue(Vec<ChannelEvent>),
    /// The poll itself failed; try again next tick.
    Retry(String),
    /// Report the event and stop polling.
    Finish(ChannelEvent),
}

/// Turns successive status replies into lifecycle events.
#[derive(Debug, Default)]
struct StatusTracker {
    ready: bool,
    pairing_code: Option<String>,
}

impl StatusTracker {
    fn observe(&mut self, reply: Result<SessionStatus, OutpostError>) -> Observation {
        let status = match reply {
            Ok(status) => status,
            // Rejected API token: needs an operator, the paired session is left alone.
            Err(e @ OutpostError::Config(_)) => {
                return Observation::Finish(ChannelEvent::LowLevelError {
                    message: e.to_string(),
                });
            }
            Err(e) => return Observation::Retry(e.to_string()),
        };

        let state = status.state.to_ascii_uppercase();
        match state.as_str() {
            "CONNECTED" if self.ready => Observation::Continue(Vec::new()),
            "CONNECTED" => {
                self.ready = true;
                self.pairing_code = None;
                Observation::Continue(vec![ChannelEvent::Authenticated, ChannelEvent::Ready])
            }
            "OPENING" => Observation::Continue(Vec::new()),
            "AUTH_FAILURE" => Observation::Finish(ChannelEvent::AuthFailure {
                reason: status.reason.unwrap_or(state),
            }),
            "PAIRING" | "UNPAIRED" if !self.ready => match status.pairing_code {
                Some(code) if self.pairing_code.as_ref() != Some(&code) => {
                    self.pairing_code = Some(code.clone());
                    Observation::Continue(vec![ChannelEvent::PairingRequired { code }])
                }
                _ => Observation::Continue(Vec::new()),
            },
            _ => Observation::Finish(ChannelEvent::Disconnected {
                reason: status.reason.unwrap_or(state),
            }),
        }
    }
}

/// One bridge session. Built fresh for every connection attempt.
pub struct BridgeDriver {
    client: BridgeClient,
    session_dir: String,
    poll_interval: Duration,
    poller: CancellationToken,
    tasks: TaskTracker,
}

impl BridgeDriver {
    pub fn new(client: BridgeClient, session_dir: String, poll_interval: Duration) -> Self {
        Self {
            client,
            session_dir,
            poll_interval,
            poller: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }
}

async fn poll_status(
    client: BridgeClient,
    sink: EventSink,
    interval: Duration,
    token: CancellationToken,
) {
    let mut tracker = StatusTracker::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let reply = tokio::select! {
            _ = token.cancelled() => break,
            reply = async {
                ticker.tick().await;
                client.status().await
            } => reply,
        };
        match tracker.observe(reply) {
            Observation::Continue(events) => {
                for event in events {
                    debug!(generation = sink.generation(), ?event, "bridge event");
                    sink.emit(event);
                }
            }
            Observation::Retry(error) => {
                warn!(generation = sink.generation(), %error, "bridge status poll failed");
            }
            Observation::Finish(event) => {
                info!(generation = sink.generation(), ?event, "bridge session ended");
                sink.emit(event);
                break;
            }
        }
    }
    debug!(generation = sink.generation(), "bridge status polling stopped");
}

#[async_trait]
impl PluginAdapter for BridgeDriver {
    fn name(&self) -> &str {
        "whatsapp-bridge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, OutpostError> {
        Ok(match self.client.status().await {
            Ok(s) if s.state.eq_ignore_ascii_case("CONNECTED") => HealthStatus::Healthy,
            Ok(s) => HealthStatus::Degraded(s.state),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    /// Stops polling and asks the bridge to close the session.
    async fn shutdown(&self) -> Result<(), OutpostError> {
        self.poller.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.client.stop_session().await
    }
}

#[async_trait]
impl SessionDriver for BridgeDriver {
    async fn initialize(&self, events: EventSink) -> Result<(), OutpostError> {
        info!(
            generation = events.generation(),
            bridge = self.client.base_url(),
            "starting bridge session"
        );
        self.client.start_session(&self.session_dir).await?;
        self.tasks.spawn(poll_status(
            self.client.clone(),
            events,
            self.poll_interval,
            self.poller.clone(),
        ));
        Ok(())
    }

    async fn session_health(&self) -> Result<SessionHealth, OutpostError> {
        let status = self.client.status().await?;
        Ok(SessionHealth::from_state(&status.state))
    }

    async fn is_registered(&self, chat_id: &str) -> Result<bool, OutpostError> {
        self.client.is_registered(chat_id).await
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<DeliveryReceipt, OutpostError> {
        self.client.send_text(chat_id, text).await
    }
}

/// Builds a [`BridgeDriver`] per connection attempt, sharing one HTTP client.
pub struct BridgeDriverFactory {
    client: BridgeClient,
    session_dir: String,
    poll_interval: Duration,
}

impl BridgeDriverFactory {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, OutpostError> {
        Ok(Self {
            client: BridgeClient::new(config)?,
            session_dir: config.session_dir.clone(),
            poll_interval: config.poll_interval(),
        })
    }
}

impl DriverFactory for BridgeDriverFactory {
    fn create(&self) -> Result<Arc<dyn SessionDriver>, OutpostError> {
        Ok(Arc::new(BridgeDriver::new(
            self.client.clone(),
            self.session_dir.clone(),
            self.poll_interval,
        )))
    }
}
