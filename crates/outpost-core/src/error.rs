// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Outpost delivery queue.

use thiserror::Error;

/// The primary error type used across all Outpost adapter traits and core operations.
#[derive(Debug, Error)]
pub enum OutpostError {
    /// Configuration errors (invalid TOML, out-of-range values, missing settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller-supplied data is missing or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transient delivery-channel errors (session closed, protocol errors, disconnection).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The recipient is not a deliverable endpoint on the channel. Never retried.
    #[error("recipient not registered: {recipient}")]
    RecipientNotRegistered { recipient: String },

    /// A job with the same caller-assigned message id already exists.
    #[error("duplicate message id: {message_id}")]
    DuplicateMessage { message_id: String },

    /// The channel has not reached the ready state.
    #[error("channel not ready: {0}")]
    NotReady(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OutpostError {
    /// Shorthand for a [`OutpostError::Channel`] without an underlying source.
    pub fn channel(message: impl Into<String>) -> Self {
        OutpostError::Channel {
            message: message.into(),
            source: None,
        }
    }
}
