// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Outpost integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic tests without a real messaging session.
//!
//! # Components
//!
//! - [`MockSessionDriver`] / [`MockDriverFactory`] - scripted session client
//! - [`MockCredentialStore`] - in-memory pairing credentials
//! - [`MockDeliveryChannel`] - delivery channel with scripted outcomes
//! - [`TestHarness`] - temp SQLite store, mock channel and processor wired together

pub mod harness;
pub mod mock_channel;
pub mod mock_driver;

pub use harness::TestHarness;
pub use mock_channel::{MockDeliveryChannel, ValidationOutcome};
pub use mock_driver::{MockCredentialStore, MockDriverFactory, MockSessionDriver};
