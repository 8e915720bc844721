// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base adapter trait shared by storage backends and session drivers.

use async_trait::async_trait;

use crate::error::OutpostError;
use crate::types::{AdapterType, HealthStatus};

/// Identity, health and lifecycle for every swappable backend.
#[async_trait]
pub trait PluginAdapter: Send + Sync + 'static {
    /// Human-readable name of this adapter instance.
    fn name(&self) -> &str;

    fn version(&self) -> semver::Version;

    fn adapter_type(&self) -> AdapterType;

    /// Performs a health check and returns the adapter's current status.
    async fn health_check(&self) -> Result<HealthStatus, OutpostError>;

    /// Releases held resources. Called once during graceful shutdown.
    async fn shutdown(&self) -> Result<(), OutpostError>;
}
