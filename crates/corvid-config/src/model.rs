// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Corvid runtime.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use corvid_core::ToolPolicy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Top-level Corvid configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CorvidConfig {
    /// Agent identity and logging.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Anthropic API settings.
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Context budget and compaction settings.
    #[serde(default)]
    pub context: ContextConfig,

    /// Job worker settings.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Scheduled task poller settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Finished job cleanup settings.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Built-in tool settings.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Human approval gate settings.
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// WhatsApp messaging runtime settings.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Process role selection.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Plugin tool policy fragments, applied after skills and agent.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Agent identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the agent.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Inline system prompt used when a conversation has no agent profile.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Path to a file containing the system prompt. Takes precedence over
    /// `system_prompt` if both are set.
    #[serde(default)]
    pub system_prompt_file: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

fn default_agent_name() -> String {
    "corvid".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Anthropic API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// Anthropic API key. `None` requires the `ANTHROPIC_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default model to use for completions.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model tried once when the primary model fails with a retryable error.
    #[serde(default)]
    pub fallback_model: Option<String>,

    /// Maximum tokens to generate per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Anthropic API version string.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Messages API endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: default_model(),
            fallback_model: None,
            max_tokens: default_max_tokens(),
            api_version: default_api_version(),
            base_url: default_base_url(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("corvid").join("corvid.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("corvid.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Context budget configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Maximum size of the conversation history sent to the model, in characters.
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    /// Number of most recent turns never folded into a compaction summary.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Model used for compaction summaries. Defaults to `anthropic.default_model`.
    #[serde(default)]
    pub compaction_model: Option<String>,

    /// Token limit for the compaction summary response.
    #[serde(default = "default_compaction_max_tokens")]
    pub compaction_max_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            keep_recent: default_keep_recent(),
            compaction_model: None,
            compaction_max_tokens: default_compaction_max_tokens(),
        }
    }
}

fn default_budget_chars() -> usize {
    400_000
}

fn default_keep_recent() -> usize {
    6
}

fn default_compaction_max_tokens() -> u32 {
    1024
}

/// Job worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// Attempt ceiling for retryable failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Interval between pending-job polls when not notified.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of pending jobs fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum model round-trips per turn before a final tool-less request.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// Minimum spacing between streamed partial updates.
    #[serde(default = "default_stream_throttle_ms")]
    pub stream_throttle_ms: u64,
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stream_throttle(&self) -> Duration {
        Duration::from_millis(self.stream_throttle_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_tool_iterations: default_max_tool_iterations(),
            stream_throttle_ms: default_stream_throttle_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_tool_iterations() -> usize {
    10
}

fn default_stream_throttle_ms() -> u64 {
    200
}

/// Scheduled task poller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between due-task polls.
    #[serde(default = "default_scheduler_poll_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of due tasks fired per poll.
    #[serde(default = "default_scheduler_batch_size")]
    pub batch_size: usize,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_scheduler_poll_ms(),
            batch_size: default_scheduler_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scheduler_poll_ms() -> u64 {
    30_000
}

fn default_scheduler_batch_size() -> usize {
    20
}

/// Retention sweep for completed and failed jobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Finished jobs older than this many days are deleted.
    #[serde(default = "default_job_max_age_days")]
    pub job_max_age_days: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl RetentionConfig {
    pub fn job_max_age(&self) -> Duration {
        Duration::from_secs(self.job_max_age_days * 24 * 60 * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            job_max_age_days: default_job_max_age_days(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_job_max_age_days() -> u64 {
    7
}

fn default_sweep_interval_ms() -> u64 {
    60 * 60 * 1000
}

/// Built-in tool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// IANA timezone used by `get_current_time` when the model passes none.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Approval gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalConfig {
    /// How often a suspended tool call re-reads its approval request.
    #[serde(default = "default_approval_poll_ms")]
    pub poll_interval_ms: u64,

    /// How long a tool call waits for a decision before the request expires.
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApprovalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_approval_poll_ms(),
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

fn default_approval_poll_ms() -> u64 {
    1_000
}

fn default_approval_timeout_secs() -> u64 {
    300
}

/// WhatsApp runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    /// Logical account whose session this process may own.
    #[serde(default = "default_account_id")]
    pub account_id: String,

    /// Worker identity recorded as lease owner. Defaults to `worker-<pid>`.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Lease time-to-live.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Heartbeat interval; values below 5000 are raised to 5000.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Wait between lease acquisition attempts while another worker holds it.
    #[serde(default = "default_acquire_retry_ms")]
    pub acquire_retry_ms: u64,

    /// Processor lock held on a claimed outbound message.
    #[serde(default = "default_outbound_lock_ms")]
    pub outbound_lock_ms: u64,

    /// Delay before a failed outbound message becomes claimable again.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Base URL of the WhatsApp bridge sidecar (`POST {bridge_url}/send`).
    #[serde(default)]
    pub bridge_url: Option<String>,

    /// Bearer token for the bridge, if it requires one.
    #[serde(default)]
    pub bridge_token: Option<String>,

    /// Address the inbound webhook listens on.
    #[serde(default = "default_ingress_bind")]
    pub ingress_bind: String,

    /// Phones allowed to talk to the agent when first seen.
    #[serde(default)]
    pub allowed_senders: Vec<String>,
}

impl WhatsAppConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Heartbeat interval with the 5 second floor applied.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(5_000))
    }

    pub fn acquire_retry(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_ms)
    }

    pub fn outbound_lock(&self) -> Duration {
        Duration::from_millis(self.outbound_lock_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn resolved_worker_id(&self) -> String {
        self.worker_id
            .clone()
            .filter(|w| !w.trim().is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()))
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            account_id: default_account_id(),
            worker_id: None,
            lease_ttl_ms: default_lease_ttl_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            acquire_retry_ms: default_acquire_retry_ms(),
            outbound_lock_ms: default_outbound_lock_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            bridge_url: None,
            bridge_token: None,
            ingress_bind: default_ingress_bind(),
            allowed_senders: Vec::new(),
        }
    }
}

fn default_account_id() -> String {
    "default".to_string()
}

fn default_lease_ttl_ms() -> u64 {
    45_000
}

fn default_heartbeat_ms() -> u64 {
    15_000
}

fn default_acquire_retry_ms() -> u64 {
    3_000
}

fn default_outbound_lock_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_ingress_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Which duties this process performs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeRole {
    /// Agent worker plus WhatsApp ingress and egress.
    #[default]
    All,
    /// Agent worker only.
    Core,
    /// WhatsApp ingress and egress.
    Whatsapp,
    /// WhatsApp inbound webhook only.
    WhatsappIngress,
    /// WhatsApp outbound delivery only.
    WhatsappEgress,
}

impl RuntimeRole {
    pub fn runs_worker(self) -> bool {
        matches!(self, RuntimeRole::All | RuntimeRole::Core)
    }

    pub fn runs_ingress(self) -> bool {
        matches!(
            self,
            RuntimeRole::All | RuntimeRole::Whatsapp | RuntimeRole::WhatsappIngress
        )
    }

    pub fn runs_egress(self) -> bool {
        matches!(
            self,
            RuntimeRole::All | RuntimeRole::Whatsapp | RuntimeRole::WhatsappEgress
        )
    }
}

/// Process role configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub role: RuntimeRole,
}

/// A plugin's tool policy fragment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    pub name: String,

    #[serde(default = "default_plugin_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,
}

impl PluginConfig {
    pub fn tool_policy(&self) -> ToolPolicy {
        ToolPolicy::new(self.allow.iter().cloned(), self.deny.iter().cloned())
    }
}

fn default_plugin_enabled() -> bool {
    true
}
