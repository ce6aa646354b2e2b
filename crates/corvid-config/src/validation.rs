// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as parseable socket addresses, non-empty paths, and lease timing.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::diagnostic::ConfigError;
use crate::model::CorvidConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CorvidConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut reject = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.agent.log_level.as_str()) {
        reject(format!(
            "agent.log_level `{}` must be one of {}",
            config.agent.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        reject("storage.database_path must not be empty".to_string());
    }

    if config.anthropic.max_tokens == 0 {
        reject("anthropic.max_tokens must be greater than 0".to_string());
    }

    if config.context.budget_chars == 0 {
        reject("context.budget_chars must be greater than 0".to_string());
    }

    if config.jobs.max_attempts == 0 {
        reject("jobs.max_attempts must be at least 1".to_string());
    }

    if config.jobs.batch_size == 0 {
        reject("jobs.batch_size must be at least 1".to_string());
    }

    if config.jobs.max_tool_iterations == 0 {
        reject("jobs.max_tool_iterations must be at least 1".to_string());
    }

    let scheduler = &config.scheduler;
    if scheduler.enabled && scheduler.poll_interval_ms == 0 {
        reject("scheduler.poll_interval_ms must be greater than 0".to_string());
    }
    if scheduler.enabled && scheduler.batch_size == 0 {
        reject("scheduler.batch_size must be at least 1".to_string());
    }

    let retention = &config.retention;
    if retention.enabled && retention.job_max_age_days == 0 {
        reject("retention.job_max_age_days must be at least 1".to_string());
    }
    if retention.enabled && retention.sweep_interval_ms == 0 {
        reject("retention.sweep_interval_ms must be greater than 0".to_string());
    }

    if config.approval.poll_interval_ms == 0 {
        reject("approval.poll_interval_ms must be greater than 0".to_string());
    }

    let whatsapp = &config.whatsapp;
    if whatsapp.account_id.trim().is_empty() {
        reject("whatsapp.account_id must not be empty".to_string());
    }

    // A lease shorter than the heartbeat interval lapses between renewals.
    if whatsapp.lease_ttl() <= whatsapp.heartbeat_interval() {
        reject(format!(
            "whatsapp.lease_ttl_ms ({}) must exceed the heartbeat interval ({} ms)",
            whatsapp.lease_ttl_ms,
            whatsapp.heartbeat_interval().as_millis()
        ));
    }

    if whatsapp.ingress_bind.parse::<SocketAddr>().is_err() {
        reject(format!(
            "whatsapp.ingress_bind `{}` is not a valid socket address",
            whatsapp.ingress_bind
        ));
    }

    if let Some(url) = &whatsapp.bridge_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        reject(format!("whatsapp.bridge_url `{url}` must be an http(s) URL"));
    }

    let mut seen_plugins = HashSet::new();
    for (i, plugin) in config.plugins.iter().enumerate() {
        if plugin.name.trim().is_empty() {
            reject(format!("plugins[{i}].name must not be empty"));
        } else if !seen_plugins.insert(plugin.name.as_str()) {
            reject(format!(
                "duplicate plugin name `{}` in [[plugins]] array",
                plugin.name
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
