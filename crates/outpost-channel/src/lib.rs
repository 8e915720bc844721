// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel lifecycle manager for the Outpost delivery queue.
//!
//! Owns the one messaging session all sends go through:
//!
//! - [`ChannelManager`] drives the connection state machine, keep-alive
//!   probing and guarded recovery.
//! - [`transition`] holds the pure transition table.
//! - [`SessionHandle`] is the capability handed to the queue processor,
//!   serialising sends when the driver cannot take concurrent calls.
//! - [`SessionDirStore`] is the on-disk pairing credential store.

pub mod credentials;
pub mod handle;
pub mod manager;
pub mod transition;

pub use credentials::SessionDirStore;
pub use handle::SessionHandle;
pub use manager::{ChannelManager, ChannelStatus};
pub use transition::{Action, RecoveryCause, Transition};
