// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order, later wins: compiled defaults, `/etc/outpost/outpost.toml`,
//! `~/.config/outpost/outpost.toml`, `./outpost.toml`, then `OUTPOST_*`
//! environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::OutpostConfig;

/// Top-level sections recognised in environment variable names.
const ENV_SECTIONS: &[&str] = &["service", "storage", "queue", "channel", "whatsapp"];

pub const SYSTEM_CONFIG_PATH: &str = "/etc/outpost/outpost.toml";
pub const LOCAL_CONFIG_FILE: &str = "outpost.toml";

/// `~/.config/outpost/outpost.toml`, if a config dir exists on this platform.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("outpost").join(LOCAL_CONFIG_FILE))
}

/// Figment for the standard hierarchy, before extraction.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(OutpostConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH));
    if let Some(user) = user_config_path() {
        figment = figment.merge(Toml::file(user));
    }
    figment
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

pub fn load_config() -> Result<OutpostConfig, figment::Error> {
    build_figment().extract()
}

/// Loads a single TOML file plus environment overrides, skipping the hierarchy.
pub fn load_config_from_path(path: &Path) -> Result<OutpostConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(OutpostConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Loads from an inline TOML string with no environment overrides.
pub fn load_config_from_str(toml_content: &str) -> Result<OutpostConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(OutpostConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// `OUTPOST_<SECTION>_<KEY>` → `<section>.<key>`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `OUTPOST_QUEUE_MAX_CONCURRENT` maps to `queue.max_concurrent`.
fn env_provider() -> Env {
    Env::prefixed("OUTPOST_").map(|key| map_env_key(key.as_str()).into())
}

pub(crate) fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(map_env_key("queue_max_concurrent"), "queue.max_concurrent");
        assert_eq!(
            map_env_key("whatsapp_default_country_code"),
            "whatsapp.default_country_code"
        );
        assert_eq!(map_env_key("storage_database_path"), "storage.database_path");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }
}
