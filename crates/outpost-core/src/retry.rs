// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policy: exponential backoff with jitter and error classification.
//!
//! Classification checks typed permanent errors first, then a deny-list of
//! permanent signatures, then an allow-list of transient signatures. Anything
//! else is treated as retryable so that unrecognised failures never drop a
//! message before `max_attempts` is exhausted.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::OutpostError;

/// Error messages that mean the delivery can never succeed.
pub const PERMANENT_SIGNATURES: &[&str] = &[
    "not registered",
    "invalid number",
    "blocked",
    "rate limited permanently",
    "invalid wid",
    "not a valid wid",
];

/// Error messages known to come from a flaky or closed channel session.
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "session closed",
    "protocol error",
    "target closed",
    "navigation timeout",
    "net::err_",
    "channel not ready",
    "connection failed",
    "timeout",
    "timed out",
    "network error",
    "disconnected",
    "etimedout",
    "econnreset",
    "econnrefused",
    "evaluation failed",
];

/// Messages returned by recipient validation that mean the address is unusable.
const RECIPIENT_REJECTIONS: &[&str] = &[
    "not registered",
    "invalid number",
    "invalid wid",
    "invalid recipient",
    "not a valid wid",
];

/// Whether a failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Classifies an error for the job retry machinery.
pub fn classify(err: &OutpostError) -> ErrorClass {
    match err {
        OutpostError::RecipientNotRegistered { .. }
        | OutpostError::Validation(_)
        | OutpostError::DuplicateMessage { .. } => ErrorClass::Permanent,
        other => classify_message(&other.to_string()),
    }
}

/// Classifies a raw error message using the signature lists.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if PERMANENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return ErrorClass::Permanent;
    }
    if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return ErrorClass::Transient;
    }
    debug!(error = message, "unknown error, defaulting to retryable");
    ErrorClass::Transient
}

/// True when the message matches a known transient channel failure.
pub fn is_transient_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// True when a recipient-validation error means the address is not deliverable.
pub fn is_recipient_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    RECIPIENT_REJECTIONS.iter().any(|sig| lower.contains(sig))
}

/// Exponential backoff: `min(base * 2^(attempts-1), max)` with ±`jitter` spread,
/// clamped to `[floor, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fractional spread around the nominal delay (0.25 means ±25%).
    pub jitter: f64,
    pub floor: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2_000),
            max: Duration::from_millis(300_000),
            jitter: 0.25,
            floor: Duration::from_millis(1_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before jitter for the given (already incremented) attempt count.
    pub fn nominal(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        let base_ms = self.base.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max)
    }

    /// Delay for `attempts` with a specific jitter draw in `[-1.0, 1.0]`.
    pub fn delay_with_draw(&self, attempts: u32, draw: f64) -> Duration {
        let nominal = self.nominal(attempts).as_secs_f64();
        let draw = draw.clamp(-1.0, 1.0);
        let jittered = nominal + nominal * self.jitter * draw;
        let floor = self.floor.min(self.max).as_secs_f64();
        let clamped = jittered.clamp(floor, self.max.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    /// Delay for `attempts` with a random jitter draw.
    pub fn delay(&self, attempts: u32) -> Duration {
        let draw = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_draw(attempts, draw)
    }
}

/// Everything a job store needs to decide between rescheduling and failing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RetryPolicy {
    pub backoff: BackoffPolicy,
    /// Jobs older than this fail on their next retryable error, regardless of attempts.
    pub retry_ceiling: Option<Duration>,
}
