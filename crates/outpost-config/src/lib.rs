// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Outpost delivery queue.
//!
//! TOML files in the XDG hierarchy, `OUTPOST_*` environment overrides,
//! strict `deny_unknown_fields` parsing and miette diagnostics with typo
//! suggestions.
//!
//! ```no_run
//! use outpost_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("max concurrent sends: {}", config.queue.max_concurrent);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{
    ChannelConfig, OutpostConfig, QueueConfig, ServiceConfig, StorageConfig, WhatsAppConfig,
};
pub use validation::queue_violations;

/// Loads the standard hierarchy and validates it.
pub fn load_and_validate() -> Result<OutpostConfig, Vec<ConfigError>> {
    finish(loader::load_config(), collect_toml_sources)
}

/// Loads a single file (plus environment overrides) and validates it.
pub fn load_and_validate_path(path: &Path) -> Result<OutpostConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_path(path), || {
        std::fs::read_to_string(path)
            .map(|content| vec![(path.display().to_string(), content)])
            .unwrap_or_default()
    })
}

/// Loads an inline TOML string and validates it.
pub fn load_and_validate_str(toml_content: &str) -> Result<OutpostConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

fn finish(
    loaded: Result<OutpostConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<OutpostConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// Contents of every config file that exists, for error span resolution.
fn collect_toml_sources() -> Vec<(String, String)> {
    let local = std::env::current_dir()
        .map(|d| d.join(loader::LOCAL_CONFIG_FILE))
        .unwrap_or_else(|_| loader::LOCAL_CONFIG_FILE.into());

    [
        Some(local),
        loader::user_config_path(),
        Some(loader::SYSTEM_CONFIG_PATH.into()),
    ]
    .into_iter()
    .flatten()
    .filter_map(|path| {
        std::fs::read_to_string(&path)
            .ok()
            .map(|content| (path.display().to_string(), content))
    })
    .collect()
}
