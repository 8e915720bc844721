// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the job store, the channel session and the processor.
//!
//! Backends extend [`PluginAdapter`] and use `#[async_trait]` so they can be
//! held as trait objects.

pub mod adapter;
pub mod channel;
pub mod session;
pub mod store;

pub use adapter::PluginAdapter;
pub use channel::{DeliveryChannel, DeliveryHandle, RecoveryListener};
pub use session::{CredentialStore, DriverFactory, EventSink, SessionDriver};
pub use store::JobStore;
