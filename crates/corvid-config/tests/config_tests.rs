// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Corvid configuration system.

use corvid_config::diagnostic::{ConfigError, suggest_key};
use corvid_config::model::CorvidConfig;
use corvid_config::{
    RuntimeRole, load_and_validate_path, load_and_validate_str, load_config_from_path,
    load_config_from_str,
};

/// Valid TOML with all known sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_corvid_config() {
    let toml = r#"
[agent]
name = "concierge"
log_level = "debug"
system_prompt = "You are helpful."

[anthropic]
api_key = "sk-ant-123"
default_model = "claude-sonnet-4-20250514"
fallback_model = "claude-haiku-4-5-20251001"
max_tokens = 2048

[storage]
database_path = "/tmp/corvid-test.db"
wal_mode = false

[context]
budget_chars = 20000
keep_recent = 4

[jobs]
max_attempts = 5
poll_interval_ms = 250

[scheduler]
poll_interval_ms = 5000

[retention]
job_max_age_days = 14

[approval]
timeout_secs = 60

[whatsapp]
account_id = "support"
worker_id = "worker-a"
lease_ttl_ms = 60000
bridge_url = "http://127.0.0.1:3000"
allowed_senders = ["15551234567"]

[runtime]
role = "whatsapp-egress"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.agent.name, "concierge");
    assert_eq!(config.agent.log_level, "debug");
    assert_eq!(config.anthropic.api_key.as_deref(), Some("sk-ant-123"));
    assert_eq!(
        config.anthropic.fallback_model.as_deref(),
        Some("claude-haiku-4-5-20251001")
    );
    assert_eq!(config.anthropic.max_tokens, 2048);
    assert!(!config.storage.wal_mode);
    assert_eq!(config.context.budget_chars, 20_000);
    assert_eq!(config.context.keep_recent, 4);
    assert_eq!(config.jobs.max_attempts, 5);
    assert_eq!(config.jobs.poll_interval_ms, 250);
    assert_eq!(config.scheduler.poll_interval_ms, 5_000);
    assert_eq!(config.retention.job_max_age_days, 14);
    assert_eq!(config.approval.timeout_secs, 60);
    assert_eq!(config.whatsapp.account_id, "support");
    assert_eq!(config.whatsapp.resolved_worker_id(), "worker-a");
    assert_eq!(config.whatsapp.allowed_senders, vec!["15551234567"]);
    assert_eq!(config.runtime.role, RuntimeRole::WhatsappEgress);
}

/// Unknown field in [agent] section produces an UnknownField error.
#[test]
fn unknown_field_in_agent_produces_error() {
    let toml = r#"
[agent]
naem = "test"
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("naem"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

/// Missing sections fall back to defaults.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should load");
    assert_eq!(config.agent.name, "corvid");
    assert_eq!(config.anthropic.default_model, "claude-sonnet-4-20250514");
    assert_eq!(config.anthropic.api_version, "2023-06-01");
    assert_eq!(config.context.keep_recent, 6);
    assert_eq!(config.jobs.max_attempts, 3);
    assert_eq!(config.jobs.max_tool_iterations, 10);
    assert_eq!(config.jobs.stream_throttle_ms, 200);
    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.poll_interval_ms, 30_000);
    assert_eq!(
        config.retention.job_max_age(),
        std::time::Duration::from_secs(7 * 24 * 60 * 60)
    );
    assert_eq!(config.approval.timeout_secs, 300);
    assert_eq!(config.whatsapp.account_id, "default");
    assert_eq!(config.whatsapp.heartbeat_ms, 15_000);
    assert_eq!(config.whatsapp.acquire_retry_ms, 3_000);
    assert_eq!(config.whatsapp.outbound_lock_ms, 30_000);
    assert_eq!(config.runtime.role, RuntimeRole::All);
    assert!(config.plugins.is_empty());
}

/// `CORVID_*` variables override file values, keeping underscores in field names.
#[test]
fn env_vars_override_file_values() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "corvid.toml",
            r#"
[agent]
name = "from-file"

[whatsapp]
account_id = "file-account"
"#,
        )?;
        jail.set_env("CORVID_AGENT_NAME", "from-env");
        jail.set_env("CORVID_WHATSAPP_LEASE_TTL_MS", "90000");
        jail.set_env("CORVID_ANTHROPIC_API_KEY", "sk-env");
        jail.set_env("CORVID_RUNTIME_ROLE", "core");
        jail.set_env("CORVID_SCHEDULER_ENABLED", "false");

        let config = load_config_from_path(std::path::Path::new("corvid.toml"))?;
        assert_eq!(config.agent.name, "from-env");
        assert_eq!(config.whatsapp.account_id, "file-account");
        assert_eq!(config.whatsapp.lease_ttl_ms, 90_000);
        assert_eq!(config.anthropic.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.runtime.role, RuntimeRole::Core);
        assert!(!config.scheduler.enabled);
        Ok(())
    });
}

/// The local `corvid.toml` is picked up by the full hierarchy loader.
#[test]
fn local_config_file_is_discovered() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "corvid.toml",
            r#"
[jobs]
batch_size = 3
"#,
        )?;
        let config = corvid_config::load_config()?;
        assert_eq!(config.jobs.batch_size, 3);
        Ok(())
    });
}

/// Typos in config keys resolve to the closest valid key.
#[test]
fn diagnostic_error_includes_unknown_key() {
    let toml = r#"
[whatsapp]
heartbeet_ms = 20000
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    let has_unknown_key = errors.iter().any(|e| {
        matches!(e, ConfigError::UnknownKey { key, suggestion, valid_keys, .. } if {
            key == "heartbeet_ms"
                && suggestion.as_deref() == Some("heartbeat_ms")
                && valid_keys.contains("lease_ttl_ms")
        })
    });
    assert!(
        has_unknown_key,
        "should have UnknownKey error with suggestion, got: {errors:?}"
    );
}

#[test]
fn diagnostic_no_suggestion_for_distant_typo() {
    let suggestion = suggest_key("qqqq", &["account_id", "worker_id"]);
    assert!(suggestion.is_none(), "should not suggest for distant typo");
}

/// Invalid type (string where number expected) produces clear message.
#[test]
fn diagnostic_invalid_type_message() {
    let toml = r#"
[jobs]
max_attempts = "three"
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject invalid type");
    assert!(
        errors.iter().any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key.contains("max_attempts"))),
        "error should name the key, got: {errors:?}"
    );
}

/// Unknown runtime roles are rejected at load time.
#[test]
fn unknown_role_rejected() {
    let toml = r#"
[runtime]
role = "everything"
"#;
    assert!(load_config_from_str(toml).is_err());
}

/// A misspelled role suggests the closest accepted one.
#[test]
fn misspelled_role_suggests_valid_role() {
    let toml = r#"
[runtime]
role = "whatsap-ingress"
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject role");
    assert!(
        errors.iter().any(|e| matches!(e, ConfigError::UnknownValue { key, value, suggestion, expected, .. } if {
            key == "runtime.role"
                && value == "whatsap-ingress"
                && suggestion.as_deref() == Some("whatsapp-ingress")
                && expected.contains("whatsapp-egress")
        })),
        "got: {errors:?}"
    );
}

/// Errors from an inline source point at the offending key.
#[test]
fn invalid_type_carries_source_span() {
    let toml = "[agent]\nname = \"corvid\"\n\n[jobs]\nmax_attempts = \"three\"\n";

    let errors = load_and_validate_str(toml).expect_err("should reject invalid type");
    let span = errors.iter().find_map(|e| match e {
        ConfigError::InvalidType { span, .. } => *span,
        _ => None,
    });
    let span = span.expect("invalid type should carry a span");
    assert_eq!(&toml[span.offset()..span.offset() + span.len()], "max_attempts");
}

/// Bad environment overrides are reported under their variable names.
#[test]
fn env_errors_name_the_variable() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("corvid.toml", "[agent]\nname = \"corvid\"\n")?;
        jail.set_env("CORVID_JOBS_MAX_ATTEMPTS", "three");

        let errors = load_and_validate_path(std::path::Path::new("corvid.toml"))
            .expect_err("bad env override should fail");
        assert!(
            errors.iter().any(|e| matches!(e, ConfigError::InvalidType { key, span, .. }
                if key == "CORVID_JOBS_MAX_ATTEMPTS" && span.is_none())),
            "got: {errors:?}"
        );
        Ok(())
    });

    figment::Jail::expect_with(|jail| {
        jail.create_file("corvid.toml", "[agent]\nname = \"corvid\"\n")?;
        jail.set_env("CORVID_WHATSAPP_HEARTBEET_MS", "20000");

        let errors = load_and_validate_path(std::path::Path::new("corvid.toml"))
            .expect_err("unknown env override should fail");
        assert!(
            errors.iter().any(|e| matches!(e, ConfigError::UnknownKey { key, suggestion, section, .. }
                if key == "CORVID_WHATSAPP_HEARTBEET_MS"
                    && suggestion.as_deref() == Some("CORVID_WHATSAPP_HEARTBEAT_MS")
                    && section.as_deref() == Some("whatsapp"))),
            "got: {errors:?}"
        );
        Ok(())
    });
}

/// ConfigError can be rendered using miette's graphical handler.
#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        section: Some("whatsapp".to_string()),
        key: "acount_id".to_string(),
        suggestion: Some("account_id".to_string()),
        valid_keys: "account_id, worker_id".to_string(),
        span: None,
        src: None,
    };

    assert!(error.code().is_some(), "should have diagnostic code");
    let help = error.help().map(|h| h.to_string()).unwrap_or_default();
    assert!(help.contains("did you mean `account_id`"), "got: {help}");

    let handler = GraphicalReportHandler::new();
    let mut buf = String::new();
    handler
        .render_report(&mut buf, &error)
        .expect("should render without error");
    assert!(buf.contains("acount_id"));
    assert!(buf.contains("[whatsapp]"));
}

/// Validation runs after a successful load.
#[test]
fn validation_runs_after_load() {
    let toml = r#"
[whatsapp]
lease_ttl_ms = 1000
"#;

    let errors = load_and_validate_str(toml).expect_err("short lease should fail");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::Validation { message } if message.contains("lease_ttl_ms"))
    ));
}

#[test]
fn serialized_defaults_round_trip_through_toml() {
    let defaults = CorvidConfig::default();
    let rendered = toml::to_string(&defaults).expect("defaults serialize");
    let parsed = load_config_from_str(&rendered).expect("rendered defaults load");
    assert_eq!(parsed.whatsapp.lease_ttl_ms, defaults.whatsapp.lease_ttl_ms);
    assert_eq!(parsed.storage.database_path, defaults.storage.database_path);
}
