// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transition table for the channel state machine.
//!
//! Pure functions only: the manager feeds in the current state plus an
//! event (or a keep-alive probe result) and carries out the returned
//! [`Action`].

use outpost_core::retry::is_transient_signature;
use outpost_core::{ChannelEvent, ConnectionState, SessionHealth};

/// Disconnect reasons reported by the session client that are safe to
/// reconnect after.
pub const RECOVERABLE_DISCONNECT_REASONS: &[&str] = &[
    "NAVIGATION",
    "CONFLICT",
    "TIMEOUT",
    "UNPAIRED",
    "UNPAIRED_IDLE",
    "LOGOUT",
];

/// Disconnect reasons that invalidate the persisted pairing.
const LOGOUT_REASONS: &[&str] = &["LOGOUT", "UNPAIRED", "UNPAIRED_IDLE"];

/// What triggered a recovery episode. Selects the initial delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCause {
    Disconnected,
    AuthFailure,
    LowLevelError,
    ProbeFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing beyond the state change.
    None,
    /// Remember the pairing code for status reporting.
    RecordPairing(String),
    /// The session is usable: clear pairing data and start the keep-alive probe.
    StartKeepalive,
    /// Hand off to the recovery coordinator.
    Recover {
        cause: RecoveryCause,
        purge_credentials: bool,
        reason: String,
    },
    /// Stay put until an operator calls `reset()`.
    AwaitReset { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ConnectionState,
    pub action: Action,
}

impl Transition {
    fn new(state: ConnectionState, action: Action) -> Self {
        Self { state, action }
    }
}

/// Whether a disconnect reason is known to be recoverable.
pub fn is_recoverable_disconnect(reason: &str) -> bool {
    let upper = reason.trim().to_ascii_uppercase();
    RECOVERABLE_DISCONNECT_REASONS.contains(&upper.as_str()) || is_transient_signature(reason)
}

fn is_logout(reason: &str) -> bool {
    LOGOUT_REASONS.contains(&reason.trim().to_ascii_uppercase().as_str())
}

/// Next state and side effect for a driver event.
pub fn on_event(current: ConnectionState, event: &ChannelEvent) -> Transition {
    match event {
        ChannelEvent::PairingRequired { code } => {
            Transition::new(current, Action::RecordPairing(code.clone()))
        }
        ChannelEvent::Authenticated | ChannelEvent::Ready => {
            Transition::new(ConnectionState::Ready, Action::StartKeepalive)
        }
        ChannelEvent::Disconnected { reason } => {
            let action = if is_recoverable_disconnect(reason) {
                Action::Recover {
                    cause: RecoveryCause::Disconnected,
                    purge_credentials: is_logout(reason),
                    reason: reason.clone(),
                }
            } else {
                Action::AwaitReset {
                    reason: reason.clone(),
                }
            };
            Transition::new(ConnectionState::Disconnected, action)
        }
        ChannelEvent::AuthFailure { reason } => Transition::new(
            ConnectionState::AuthFailed,
            Action::Recover {
                cause: RecoveryCause::AuthFailure,
                purge_credentials: true,
                reason: reason.clone(),
            },
        ),
        ChannelEvent::LowLevelError { message } => {
            let action = if is_transient_signature(message) {
                Action::Recover {
                    cause: RecoveryCause::LowLevelError,
                    purge_credentials: false,
                    reason: message.clone(),
                }
            } else {
                Action::AwaitReset {
                    reason: message.clone(),
                }
            };
            Transition::new(ConnectionState::Error, action)
        }
    }
}

/// Outcome of one keep-alive probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Healthy,
    /// Enter recovery with the given transition.
    Recover(Transition),
    /// Log and keep probing.
    Ignore(String),
}

/// Classifies a probe result. `Err` carries the probe error message.
pub fn on_probe(result: Result<&SessionHealth, &str>) -> ProbeVerdict {
    match result {
        Ok(health) if health.is_connected() => ProbeVerdict::Healthy,
        Ok(health) => ProbeVerdict::Recover(Transition::new(
            ConnectionState::Disconnected,
            Action::Recover {
                cause: RecoveryCause::ProbeFailure,
                purge_credentials: matches!(health, SessionHealth::Unpaired),
                reason: format!("session health {health}"),
            },
        )),
        Err(message) if is_transient_signature(message) => ProbeVerdict::Recover(Transition::new(
            ConnectionState::Error,
            Action::Recover {
                cause: RecoveryCause::ProbeFailure,
                purge_credentials: false,
                reason: message.to_string(),
            },
        )),
        Err(message) => ProbeVerdict::Ignore(message.to_string()),
    }
}
