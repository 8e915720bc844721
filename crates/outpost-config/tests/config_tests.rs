// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Outpost configuration system.

use std::io::Write;

use outpost_config::diagnostic::ConfigError;
use outpost_config::model::OutpostConfig;
use outpost_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};
use serial_test::serial;

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[service]
name = "outpost-test"
log_level = "debug"

[storage]
database_path = "/tmp/outpost.db"
wal_mode = false

[queue]
max_concurrent = 5
process_interval_ms = 3000
stalled_timeout_ms = 120000
stall_check_interval_ms = 30000
max_attempts = 3
backoff_base_ms = 1000
backoff_max_ms = 60000
retry_ceiling_hours = 24
retention_hours = 72

[channel]
keepalive_interval_secs = 60
auth_failure_recovery_delay_ms = 15000
max_recovery_attempts = 3
serialize_sends = false

[whatsapp]
bridge_url = "http://127.0.0.1:3000"
api_token = "secret"
default_country_code = "44"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.service.name, "outpost-test");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.queue.max_concurrent, 5);
    assert_eq!(config.queue.retry_ceiling_hours, Some(24));
    assert_eq!(config.queue.retention_hours, Some(72));
    assert_eq!(config.channel.max_recovery_attempts, 3);
    assert!(!config.channel.serialize_sends);
    // Unset keys in a present section keep their defaults.
    assert_eq!(config.channel.disconnect_recovery_delay_ms, 3_000);
    assert_eq!(config.whatsapp.bridge_url.as_deref(), Some("http://127.0.0.1:3000"));
    assert_eq!(config.whatsapp.default_country_code, "44");
}

#[test]
fn empty_config_uses_defaults() {
    let config = load_and_validate_str("").expect("defaults should validate");
    assert_eq!(config, OutpostConfig::default());
    assert_eq!(config.queue.max_concurrent, 3);
    assert_eq!(config.queue.process_interval_ms, 5_000);
    assert_eq!(config.queue.stalled_timeout_ms, 300_000);
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.channel.keepalive_interval_secs, 120);
    assert_eq!(config.channel.auth_failure_recovery_delay_ms, 10_000);
    assert_eq!(config.channel.retry_recovery_delay_ms, 30_000);
    assert!(config.queue.retry_ceiling().is_none());
}

#[test]
fn unknown_key_gets_suggestion() {
    let toml = "[queue]\nmax_concurent = 4\n";
    let errors = load_and_validate_str(toml).expect_err("unknown key must fail");
    match &errors[0] {
        ConfigError::UnknownKey {
            key,
            suggestion,
            valid_keys,
            ..
        } => {
            assert_eq!(key, "max_concurent");
            assert_eq!(suggestion.as_deref(), Some("max_concurrent"));
            assert!(valid_keys.contains("process_interval_ms"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_top_level_section_is_rejected() {
    let errors = load_and_validate_str("[telegram]\nbot_token = \"x\"\n").unwrap_err();
    assert!(matches!(errors[0], ConfigError::UnknownKey { .. }));
}

#[test]
fn wrong_type_is_reported() {
    let errors = load_and_validate_str("[queue]\nmax_concurrent = \"many\"\n").unwrap_err();
    match &errors[0] {
        ConfigError::InvalidType { key, .. } => assert!(key.contains("max_concurrent")),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn out_of_range_values_are_collected() {
    let toml = r#"
[queue]
max_concurrent = 0
process_interval_ms = 500
stalled_timeout_ms = 1000
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(
        errors
            .iter()
            .all(|e| matches!(e, ConfigError::Validation { .. }))
    );
}

#[test]
fn config_error_renders_with_miette() {
    let errors = load_and_validate_str("[service]\nnaem = \"x\"\n").unwrap_err();
    let handler = miette::GraphicalReportHandler::new();
    let mut out = String::new();
    handler
        .render_report(&mut out, &errors[0] as &dyn miette::Diagnostic)
        .expect("render should succeed");
    assert!(out.contains("naem"));
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[queue]\nmax_concurrent = 2\n").unwrap();

    // SAFETY: serialised with other env-touching tests.
    unsafe {
        std::env::set_var("OUTPOST_QUEUE_MAX_CONCURRENT", "7");
        std::env::set_var("OUTPOST_SERVICE_NAME", "from-env");
    }
    let result = load_and_validate_path(file.path());
    unsafe {
        std::env::remove_var("OUTPOST_QUEUE_MAX_CONCURRENT");
        std::env::remove_var("OUTPOST_SERVICE_NAME");
    }

    let config = result.expect("should load");
    assert_eq!(config.queue.max_concurrent, 7);
    assert_eq!(config.service.name, "from-env");
}

#[test]
#[serial]
fn missing_config_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_and_validate_path(&dir.path().join("absent.toml")).expect("should load");
    assert_eq!(config.queue.max_concurrent, 3);
}
