// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Bounds that serde cannot express are checked here. All violations are
//! collected and returned together.

use crate::diagnostic::ConfigError;
use crate::model::{OutpostConfig, QueueConfig};

pub const MIN_CONCURRENT: usize = 1;
pub const MAX_CONCURRENT: usize = 10;
pub const MIN_PROCESS_INTERVAL_MS: u64 = 2_000;
pub const MIN_STALLED_TIMEOUT_MS: u64 = 60_000;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &OutpostConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.service.log_level.to_ascii_lowercase().as_str()) {
        errors.push(invalid(format!(
            "service.log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.service.log_level
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(invalid("storage.database_path must not be empty".into()));
    }

    errors.extend(queue_violations(&config.queue).into_iter().map(invalid));

    let channel = &config.channel;
    if channel.keepalive_interval_secs == 0 {
        errors.push(invalid("channel.keepalive_interval_secs must be at least 1".into()));
    }
    if channel.probe_timeout_secs == 0 {
        errors.push(invalid("channel.probe_timeout_secs must be at least 1".into()));
    }
    if channel.init_timeout_secs == 0 {
        errors.push(invalid("channel.init_timeout_secs must be at least 1".into()));
    }
    if channel.max_recovery_attempts == 0 {
        errors.push(invalid("channel.max_recovery_attempts must be at least 1".into()));
    }

    let whatsapp = &config.whatsapp;
    if whatsapp.default_country_code.is_empty()
        || !whatsapp.default_country_code.chars().all(|c| c.is_ascii_digit())
    {
        errors.push(invalid(format!(
            "whatsapp.default_country_code must be digits only, got `{}`",
            whatsapp.default_country_code
        )));
    }
    if let Some(url) = &whatsapp.bridge_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(invalid(format!(
            "whatsapp.bridge_url must start with http:// or https://, got `{url}`"
        )));
    }
    if whatsapp.poll_interval_ms == 0 {
        errors.push(invalid("whatsapp.poll_interval_ms must be at least 1".into()));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Bound checks for the queue section.
///
/// Also used by the processor when applying a runtime config update, so the
/// messages name the config keys.
pub fn queue_violations(queue: &QueueConfig) -> Vec<String> {
    let mut out = Vec::new();

    if !(MIN_CONCURRENT..=MAX_CONCURRENT).contains(&queue.max_concurrent) {
        out.push(format!(
            "queue.max_concurrent must be between {MIN_CONCURRENT} and {MAX_CONCURRENT}, got {}",
            queue.max_concurrent
        ));
    }
    if queue.process_interval_ms < MIN_PROCESS_INTERVAL_MS {
        out.push(format!(
            "queue.process_interval_ms must be at least {MIN_PROCESS_INTERVAL_MS}, got {}",
            queue.process_interval_ms
        ));
    }
    if queue.stalled_timeout_ms < MIN_STALLED_TIMEOUT_MS {
        out.push(format!(
            "queue.stalled_timeout_ms must be at least {MIN_STALLED_TIMEOUT_MS}, got {}",
            queue.stalled_timeout_ms
        ));
    }
    if queue.stall_check_interval_ms == 0 {
        out.push("queue.stall_check_interval_ms must be at least 1".to_string());
    }
    if queue.max_attempts == 0 {
        out.push("queue.max_attempts must be at least 1".to_string());
    }
    if queue.backoff_base_ms == 0 {
        out.push("queue.backoff_base_ms must be at least 1".to_string());
    }
    if queue.backoff_max_ms < queue.backoff_base_ms {
        out.push(format!(
            "queue.backoff_max_ms ({}) must not be less than queue.backoff_base_ms ({})",
            queue.backoff_max_ms, queue.backoff_base_ms
        ));
    }
    if queue.retention_sweep_interval_secs == 0 {
        out.push("queue.retention_sweep_interval_secs must be at least 1".to_string());
    }

    out
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&OutpostConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_queue_violation() {
        let mut config = OutpostConfig::default();
        config.queue.max_concurrent = 11;
        config.queue.process_interval_ms = 1_000;
        config.queue.stalled_timeout_ms = 59_999;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let queue = QueueConfig {
            max_concurrent: 0,
            ..QueueConfig::default()
        };
        let violations = queue_violations(&queue);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("max_concurrent"));
    }

    #[test]
    fn backoff_max_below_base_is_rejected() {
        let queue = QueueConfig {
            backoff_base_ms: 5_000,
            backoff_max_ms: 4_000,
            ..QueueConfig::default()
        };
        assert!(queue_violations(&queue)[0].contains("backoff_max_ms"));
    }

    #[test]
    fn bridge_url_must_be_http() {
        let mut config = OutpostConfig::default();
        config.whatsapp.bridge_url = Some("localhost:3000".into());
        config.whatsapp.default_country_code = "+62".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
