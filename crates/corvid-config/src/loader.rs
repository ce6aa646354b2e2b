// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./corvid.toml` > `~/.config/corvid/corvid.toml` > `/etc/corvid/corvid.toml`
//! with environment variable overrides via `CORVID_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CorvidConfig;

/// Top-level sections that accept scalar overrides from the environment.
const ENV_SECTIONS: &[&str] = &[
    "agent",
    "anthropic",
    "storage",
    "context",
    "jobs",
    "scheduler",
    "retention",
    "tools",
    "approval",
    "whatsapp",
    "runtime",
];

pub(crate) const SYSTEM_CONFIG_PATH: &str = "/etc/corvid/corvid.toml";
pub(crate) const LOCAL_CONFIG_PATH: &str = "corvid.toml";

pub(crate) fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("corvid/corvid.toml"))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/corvid/corvid.toml` (system-wide)
/// 3. `~/.config/corvid/corvid.toml` (user XDG config)
/// 4. `./corvid.toml` (local directory)
/// 5. `CORVID_*` environment variables
pub fn load_config() -> Result<CorvidConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<CorvidConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CorvidConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CorvidConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CorvidConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(CorvidConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Maps a lowercased, prefix-stripped env key onto its dotted config path.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `whatsapp_lease_ttl_ms` maps to `whatsapp.lease_ttl_ms`. Keys outside a
/// known section pass through unchanged and fail `deny_unknown_fields`.
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

/// The `CORVID_*` variable that sets the config value at `path`.
pub(crate) fn env_var_name(path: &[&str]) -> String {
    format!("CORVID_{}", path.join("_").to_ascii_uppercase())
}

/// Environment variable provider with explicit section-to-dot mapping.
///
/// `Env::split("_")` would turn `CORVID_ANTHROPIC_API_KEY` into
/// `anthropic.api.key`; the mapping keeps field names intact.
fn env_provider() -> Env {
    Env::prefixed("CORVID_").map(|key| map_env_key(key.as_str()).into())
}
