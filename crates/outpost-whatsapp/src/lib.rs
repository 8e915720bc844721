// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp session driver for Outpost.
//!
//! Talks to a session-automation bridge that keeps a paired WhatsApp Web
//! session alive and exposes it over REST. The channel manager sees it only
//! through [`outpost_core::SessionDriver`].

pub mod client;
pub mod driver;
pub mod types;

pub use client::BridgeClient;
pub use driver::{BridgeDriver, BridgeDriverFactory};
