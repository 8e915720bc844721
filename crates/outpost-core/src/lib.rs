// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Outpost delivery queue.
//!
//! This crate provides the trait seams, error taxonomy, retry policy and
//! common types shared by the job store, the channel lifecycle manager and
//! the queue processor.

pub mod error;
pub mod recipient;
pub mod retry;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::OutpostError;
pub use recipient::{NormalizedRecipient, normalize_recipient};
pub use retry::{BackoffPolicy, ErrorClass, RetryPolicy, classify, classify_message};
pub use types::{
    AdapterType, ChannelEvent, ConnectionState, DEFAULT_MAX_ATTEMPTS, DeliveryReceipt,
    EnqueueReceipt, HealthStatus, Job, JobStatus, NewJob, Priority, QueueStats, RetryOutcome,
    SessionHealth, SubmitRequest,
};

pub use traits::{
    CredentialStore, DeliveryChannel, DeliveryHandle, DriverFactory, EventSink, JobStore,
    PluginAdapter, RecoveryListener, SessionDriver,
};
