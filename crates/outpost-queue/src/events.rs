// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue lifecycle and delivery events broadcast to observers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Capacity of the broadcast buffer. Slow subscribers see `Lagged`.
pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Started,
    Stopped,
    Resumed,
    MessageSent {
        job_id: String,
        message_id: String,
        receipt: String,
    },
    MessageRetry {
        job_id: String,
        attempts: u32,
        next_retry: DateTime<Utc>,
        error: String,
    },
    MessageFailed {
        job_id: String,
        reason: String,
        /// True when the failure was classified permanent rather than exhausted.
        permanent: bool,
    },
    StalledJobs {
        count: usize,
    },
    ConfigUpdated {
        max_concurrent: usize,
        process_interval_ms: u64,
        stalled_timeout_ms: u64,
    },
}
