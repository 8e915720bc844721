// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Outpost delivery queue.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key is
//! reported at startup instead of being silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Outpost configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutpostConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Queue processor, stall detector and retry settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Channel lifecycle and recovery settings.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Session bridge driver settings.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

/// Process identity and logging.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "outpost".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite job store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL journal mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("outpost").join("outpost.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("outpost.db"))
        .display()
        .to_string()
}

fn default_true() -> bool {
    true
}

/// Queue processor configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Dispatch concurrency budget (1..=10).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Dispatch tick interval in milliseconds (>= 2000).
    #[serde(default = "default_process_interval_ms")]
    pub process_interval_ms: u64,

    /// Active jobs older than this are reclaimed by the stall detector (>= 60000).
    #[serde(default = "default_stalled_timeout_ms")]
    pub stalled_timeout_ms: u64,

    #[serde(default = "default_stall_check_interval_ms")]
    pub stall_check_interval_ms: u64,

    /// Attempts allowed per job, fixed at creation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Fail retryable jobs older than this many hours. Disabled when unset.
    #[serde(default)]
    pub retry_ceiling_hours: Option<u64>,

    /// Delete finished jobs older than this many hours. Disabled when unset.
    #[serde(default)]
    pub retention_hours: Option<u64>,

    #[serde(default = "default_retention_sweep_interval_secs")]
    pub retention_sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            process_interval_ms: default_process_interval_ms(),
            stalled_timeout_ms: default_stalled_timeout_ms(),
            stall_check_interval_ms: default_stall_check_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            retry_ceiling_hours: None,
            retention_hours: None,
            retention_sweep_interval_secs: default_retention_sweep_interval_secs(),
        }
    }
}

impl QueueConfig {
    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn stalled_timeout(&self) -> Duration {
        Duration::from_millis(self.stalled_timeout_ms)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }

    pub fn retry_ceiling(&self) -> Option<Duration> {
        self.retry_ceiling_hours
            .map(|h| Duration::from_secs(h.saturating_mul(3600)))
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_process_interval_ms() -> u64 {
    5_000
}

fn default_stalled_timeout_ms() -> u64 {
    300_000
}

fn default_stall_check_interval_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_retention_sweep_interval_secs() -> u64 {
    3_600
}

/// Channel lifecycle manager configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Keep-alive probe interval while ready.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Upper bound on driver initialisation in `connect()`.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    #[serde(default = "default_disconnect_recovery_delay_ms")]
    pub disconnect_recovery_delay_ms: u64,

    #[serde(default = "default_auth_failure_recovery_delay_ms")]
    pub auth_failure_recovery_delay_ms: u64,

    /// Delay before each reconnect after the first one fails.
    #[serde(default = "default_retry_recovery_delay_ms")]
    pub retry_recovery_delay_ms: u64,

    /// Reconnect attempts per recovery episode before the channel is `failed`.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Serialize validate+send calls even if the driver claims to be concurrency-safe.
    #[serde(default = "default_true")]
    pub serialize_sends: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            init_timeout_secs: default_init_timeout_secs(),
            disconnect_recovery_delay_ms: default_disconnect_recovery_delay_ms(),
            auth_failure_recovery_delay_ms: default_auth_failure_recovery_delay_ms(),
            retry_recovery_delay_ms: default_retry_recovery_delay_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
            serialize_sends: true,
        }
    }
}

impl ChannelConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn disconnect_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_recovery_delay_ms)
    }

    pub fn auth_failure_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.auth_failure_recovery_delay_ms)
    }

    pub fn retry_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.retry_recovery_delay_ms)
    }
}

fn default_keepalive_interval_secs() -> u64 {
    120
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_init_timeout_secs() -> u64 {
    60
}

fn default_disconnect_recovery_delay_ms() -> u64 {
    3_000
}

fn default_auth_failure_recovery_delay_ms() -> u64 {
    10_000
}

fn default_retry_recovery_delay_ms() -> u64 {
    30_000
}

fn default_max_recovery_attempts() -> u32 {
    2
}

/// HTTP session bridge configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    /// Base URL of the session bridge. Required by `serve`.
    #[serde(default)]
    pub bridge_url: Option<String>,

    /// Bearer token sent with every bridge request.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Directory holding persisted pairing credentials.
    #[serde(default = "default_session_dir")]
    pub session_dir: String,

    /// Country code applied to local numbers.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,

    /// Interval between bridge status polls used to detect lifecycle events.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: None,
            api_token: None,
            session_dir: default_session_dir(),
            default_country_code: default_country_code(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl WhatsAppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_session_dir() -> String {
    dirs::data_dir()
        .map(|d| d.join("outpost").join("session"))
        .unwrap_or_else(|| std::path::PathBuf::from(".outpost-session"))
        .display()
        .to_string()
}

fn default_country_code() -> String {
    "62".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_request_timeout_secs() -> u64 {
    30
}
