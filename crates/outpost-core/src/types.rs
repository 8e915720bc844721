// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Outpost delivery queue.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::OutpostError;

/// Attempts allowed per job unless the caller overrides it at creation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Longest initial scheduling offset accepted at submission (one year).
pub const MAX_DELAY_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Storage,
    Channel,
}

// --- Jobs ---

/// Ordering hint used when claiming ready jobs. Higher priorities are claimed first.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Numeric rank persisted by storage backends so that `ORDER BY` is meaningful.
    pub fn rank(self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Priority::Low),
            1 => Some(Priority::Normal),
            2 => Some(Priority::High),
            _ => None,
        }
    }
}

/// Lifecycle status of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Waiting,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Delayed,
        JobStatus::Paused,
    ];

    /// `completed` and `failed` accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One durable unit of outbound work with its own retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Store-assigned identifier.
    pub id: String,
    /// Caller-assigned identifier used for external correlation and deduplication.
    pub message_id: String,
    /// Destination identifier on the channel (e.g. `628123456789@c.us`).
    pub chat_id: String,
    pub body: String,
    pub formatted_recipient: String,
    pub original_recipient: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest instant the job may be claimed. Meaningful only while waiting or delayed.
    pub next_retry: DateTime<Utc>,
    /// Initial scheduling offset requested at submission.
    pub delay_ms: u64,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub stalled_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Short, log-safe preview of the message body.
    pub fn body_preview(&self) -> String {
        preview(&self.body, 50)
    }
}

/// Payload for creating a job. Produced from a [`SubmitRequest`] after recipient normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub message_id: Option<String>,
    pub chat_id: String,
    pub body: String,
    pub formatted_recipient: String,
    pub original_recipient: String,
    pub priority: Priority,
    pub delay_ms: u64,
    pub max_attempts: u32,
}

impl NewJob {
    /// Rejects payloads with missing fields.
    pub fn validate(&self) -> Result<(), OutpostError> {
        let required = [
            ("chat_id", &self.chat_id),
            ("body", &self.body),
            ("formatted_recipient", &self.formatted_recipient),
            ("original_recipient", &self.original_recipient),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(OutpostError::Validation(format!(
                "missing payload fields: {}",
                missing.join(", ")
            )));
        }
        if self.max_attempts == 0 {
            return Err(OutpostError::Validation(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.delay_ms > MAX_DELAY_MS {
            return Err(OutpostError::Validation(format!(
                "delay_ms must not exceed {MAX_DELAY_MS}"
            )));
        }
        if let Some(id) = &self.message_id
            && id.trim().is_empty()
        {
            return Err(OutpostError::Validation(
                "message_id must not be blank when provided".into(),
            ));
        }
        Ok(())
    }
}

/// A caller's request to deliver one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Recipient as supplied by the caller (any formatting).
    pub recipient: String,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Returned by `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub job_id: String,
    pub message_id: String,
    pub status: JobStatus,
    pub priority: Priority,
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: u64,
    pub total: u64,
}

impl QueueStats {
    /// Adds `count` jobs of `status` to the tally.
    pub fn record(&mut self, status: JobStatus, count: u64) {
        let slot = match status {
            JobStatus::Waiting => &mut self.waiting,
            JobStatus::Active => &mut self.active,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Paused => &mut self.paused,
        };
        *slot += count;
        self.total += count;
    }
}

/// Result of applying a retryable failure to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The job returned to `waiting` and becomes eligible at `next_retry`.
    Rescheduled {
        attempts: u32,
        next_retry: DateTime<Utc>,
    },
    /// Attempts are exhausted (or the retry ceiling passed); the job is `failed`.
    Failed { attempts: u32, reason: String },
}

/// Provider-assigned identifier confirming a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryReceipt(pub String);

// --- Channel session ---

/// Lifecycle state of the single delivery-channel session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Initializing,
    Ready,
    AuthFailed,
    Disconnected,
    Recovering,
    Error,
    /// Terminal after repeated unsuccessful recovery; needs an explicit reset.
    Failed,
}

/// Closed set of events the session automation reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The session needs pairing; `code` is the payload to present to the operator.
    PairingRequired { code: String },
    Authenticated,
    Ready,
    Disconnected { reason: String },
    AuthFailure { reason: String },
    LowLevelError { message: String },
}

/// Session health as reported by a keep-alive probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionHealth {
    Connected,
    Opening,
    Pairing,
    Conflict,
    Unpaired,
    Timeout,
    Other(String),
}

impl SessionHealth {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionHealth::Connected)
    }

    /// Maps the provider's state string (e.g. `CONNECTED`, `UNPAIRED`).
    pub fn from_state(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "CONNECTED" => SessionHealth::Connected,
            "OPENING" => SessionHealth::Opening,
            "PAIRING" => SessionHealth::Pairing,
            "CONFLICT" => SessionHealth::Conflict,
            "UNPAIRED" | "UNPAIRED_IDLE" => SessionHealth::Unpaired,
            "TIMEOUT" => SessionHealth::Timeout,
            other => SessionHealth::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SessionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionHealth::Connected => write!(f, "CONNECTED"),
            SessionHealth::Opening => write!(f, "OPENING"),
            SessionHealth::Pairing => write!(f, "PAIRING"),
            SessionHealth::Conflict => write!(f, "CONFLICT"),
            SessionHealth::Unpaired => write!(f, "UNPAIRED"),
            SessionHealth::Timeout => write!(f, "TIMEOUT"),
            SessionHealth::Other(s) => write!(f, "{s}"),
        }
    }
}

// --- Timestamps ---

/// Fixed-width UTC timestamp (`2026-01-01T00:00:00.000Z`) so string order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Truncates `text` to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
