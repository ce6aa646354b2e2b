// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The agent worker loop.
//!
//! [`AgentWorker`] waits for pending jobs (woken by a [`Notify`] or the poll
//! interval), claims them one at a time and runs the full pipeline: context
//! load, budget, tool policy, approval gate, model turn, persistence and,
//! for WhatsApp, the outbound enqueue. Every failure is classified and routed
//! through [`JobController::handle_failure`].

use std::sync::Arc;
use std::time::Duration;

use corvid_config::CorvidConfig;
use corvid_config::model::PluginConfig;
use corvid_context::{ContextBudgeter, SystemPrompt};
use corvid_core::types::{Job, MessageId, MessageStatus, NewOutbound, StoredMessage};
use corvid_core::{
    ApprovalStore, Channel, ConversationStore, CorvidError, FailureReason, JobStore, MemoryStore,
    OutboxStore, ProviderAdapter, Turn,
};
use corvid_skill::{
    ApprovalGate, ApprovalScope, ToolRegistry, bind_memory_tools, filter_tools, register_builtins,
    resolve_policy,
};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobs::{JobController, JobOutcome};
use crate::runner::{TurnPlan, TurnResult, TurnRunner};
use crate::streaming::forward_throttled;

/// Store handles the worker needs. One backend usually provides all of them.
#[derive(Clone)]
pub struct WorkerStores {
    pub jobs: Arc<dyn JobStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub approvals: Arc<dyn ApprovalStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub memory: Arc<dyn MemoryStore>,
}

impl WorkerStores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: JobStore + ConversationStore + ApprovalStore + OutboxStore + MemoryStore + 'static,
    {
        Self {
            jobs: backend.clone(),
            conversations: backend.clone(),
            approvals: backend.clone(),
            outbox: backend.clone(),
            memory: backend,
        }
    }
}

/// How a single job ended up after [`AgentWorker::process_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun {
    /// Another worker claimed it, or it was no longer pending.
    Skipped,
    Completed { model_used: String },
    Retried { attempt: u32 },
    Failed { reason: FailureReason },
}

/// Processes queued conversation turns.
pub struct AgentWorker {
    jobs: JobController,
    conversations: Arc<dyn ConversationStore>,
    outbox: Arc<dyn OutboxStore>,
    memory: Arc<dyn MemoryStore>,
    budgeter: ContextBudgeter,
    runner: TurnRunner,
    gate: ApprovalGate,
    prompt: SystemPrompt,
    tools: ToolRegistry,
    plugins: Vec<PluginConfig>,
    default_model: String,
    fallback_model: Option<String>,
    account_id: String,
    budget_chars: usize,
    batch_size: usize,
    poll_interval: Duration,
    stream_throttle: Duration,
    notify: Arc<Notify>,
}

impl AgentWorker {
    /// Builds a worker with the built-in tools registered.
    pub fn new(
        stores: WorkerStores,
        provider: Arc<dyn ProviderAdapter>,
        prompt: SystemPrompt,
        config: &CorvidConfig,
    ) -> Result<Self, CorvidError> {
        let timezone: chrono_tz::Tz = config.tools.default_timezone.parse().map_err(|_| {
            CorvidError::Config(format!(
                "unknown timezone `{}` in tools.default_timezone",
                config.tools.default_timezone
            ))
        })?;

        let mut tools = ToolRegistry::new();
        register_builtins(
            &mut tools,
            timezone,
            stores.outbox.clone(),
            stores.memory.clone(),
            &config.whatsapp.account_id,
        )?;

        info!(
            agent_name = config.agent.name.as_str(),
            model = config.anthropic.default_model.as_str(),
            tools = tools.len(),
            "agent worker initialized"
        );

        Ok(Self {
            jobs: JobController::new(stores.jobs, config.jobs.max_attempts),
            conversations: stores.conversations,
            outbox: stores.outbox,
            memory: stores.memory,
            budgeter: ContextBudgeter::new(
                provider.clone(),
                &config.context,
                &config.anthropic.default_model,
            ),
            runner: TurnRunner::new(
                provider,
                config.anthropic.max_tokens,
                config.jobs.max_tool_iterations,
            ),
            gate: ApprovalGate::new(stores.approvals, &config.approval),
            prompt,
            tools,
            plugins: config.plugins.clone(),
            default_model: config.anthropic.default_model.clone(),
            fallback_model: config.anthropic.fallback_model.clone(),
            account_id: config.whatsapp.account_id.clone(),
            budget_chars: config.context.budget_chars,
            batch_size: config.jobs.batch_size.max(1),
            poll_interval: config.jobs.poll_interval(),
            stream_throttle: config.jobs.stream_throttle(),
            notify: Arc::new(Notify::new()),
        })
    }

    /// Handle for waking the worker when new jobs are enqueued in-process.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn jobs(&self) -> &JobController {
        &self.jobs
    }

    /// Runs until `cancel` fires. A job already in progress is finished first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.batch_size,
            poll_ms = self.poll_interval.as_millis() as u64,
            "agent worker running"
        );

        while !cancel.is_cancelled() {
            let processed = match self.run_once(&cancel).await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "failed to fetch pending jobs");
                    0
                }
            };
            if processed == self.batch_size {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => debug!("worker notified"),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("agent worker stopped");
    }

    /// Processes one batch of pending jobs. Returns how many were fetched.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<usize, CorvidError> {
        let pending = self.jobs.pending(self.batch_size).await?;
        let fetched = pending.len();
        for job in pending {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.process_job(&job).await {
                error!(job_id = %job.id, error = %e, "job bookkeeping failed");
            }
        }
        Ok(fetched)
    }

    /// Claims and runs one job.
    ///
    /// Errors from the turn itself are recorded on the job; only failures of
    /// the job bookkeeping are returned.
    pub async fn process_job(&self, job: &Job) -> Result<JobRun, CorvidError> {
        let Some(job) = self.jobs.claim(&job.id).await? else {
            return Ok(JobRun::Skipped);
        };
        info!(
            job_id = %job.id,
            conversation_id = %job.conversation_id,
            attempt = job.attempt_count,
            "processing job"
        );

        let mut placeholder = None;
        let error = match self.execute(&job, &mut placeholder).await {
            Ok(model_used) => {
                self.jobs.complete(&job.id, Some(&model_used)).await?;
                return Ok(JobRun::Completed { model_used });
            }
            Err(e) => e,
        };

        error!(
            job_id = %job.id,
            reason = %error.failure_reason(),
            error = %error,
            "job attempt failed"
        );
        if let Some(message_id) = placeholder
            && let Err(e) = self.conversations.mark_message_failed(&message_id).await
        {
            warn!(message_id = %message_id, error = %e, "failed to mark placeholder failed");
        }

        Ok(match self.jobs.handle_failure(&job.id, &error).await? {
            JobOutcome::Retried { attempt } => JobRun::Retried { attempt },
            JobOutcome::Failed { reason } => JobRun::Failed { reason },
        })
    }

    /// The turn pipeline. Returns the model that produced the reply.
    async fn execute(
        &self,
        job: &Job,
        placeholder: &mut Option<MessageId>,
    ) -> Result<String, CorvidError> {
        let context = self
            .conversations
            .get_conversation_context(&job.conversation_id)
            .await?
            .ok_or_else(|| {
                CorvidError::InvalidContext(format!(
                    "conversation {} not found",
                    job.conversation_id
                ))
            })?;
        let channel = context.conversation.channel;

        let turns: Vec<Turn> = context
            .messages
            .iter()
            .filter(|m| is_context_message(m))
            .map(StoredMessage::to_turn)
            .collect();
        if turns.is_empty() {
            return Err(CorvidError::InvalidContext(format!(
                "conversation {} has no messages",
                job.conversation_id
            )));
        }

        let budgeted = self.budgeter.fit(turns, self.budget_chars).await;
        if let Some(summary) = &budgeted.summary {
            self.conversations
                .add_summary_message(&job.conversation_id, summary, channel, budgeted.summarized)
                .await?;
            info!(
                job_id = %job.id,
                summarized = budgeted.summarized,
                "persisted compaction summary"
            );
        }
        if budgeted.truncated > 0 {
            info!(
                job_id = %job.id,
                dropped = budgeted.truncated,
                remaining = budgeted.turns.len(),
                "context truncated to budget"
            );
        }

        let policy = resolve_policy(
            channel,
            &context.skills,
            context.agent.as_ref(),
            &self.plugins,
        );
        let allowed = bind_memory_tools(
            &filter_tools(&self.tools, &policy),
            &self.memory,
            &job.conversation_id,
        );
        let phone = context.contact.as_ref().map(|c| c.phone.clone());
        let tools = self.gate.wrap(
            &allowed,
            ApprovalScope {
                job_id: job.id.clone(),
                conversation_id: job.conversation_id.clone(),
                channel,
                phone: phone.clone(),
            },
        );

        let agent = context.agent.as_ref();
        let plan = TurnPlan {
            model: agent
                .and_then(|a| a.model.clone())
                .unwrap_or_else(|| self.default_model.clone()),
            fallback_model: agent
                .and_then(|a| a.fallback_model.clone())
                .or_else(|| self.fallback_model.clone()),
            system_prompt: Some(self.prompt.for_agent(agent)),
            turns: budgeted.turns,
        };

        match channel {
            Channel::Web => {
                let message_id = self
                    .conversations
                    .create_placeholder(&job.conversation_id, channel)
                    .await?;
                *placeholder = Some(message_id.clone());

                let result = self.run_streaming(&plan, &tools, &message_id).await?;
                self.conversations
                    .finalize_message(&message_id, &result.text, result.tool_calls_json())
                    .await?;
                Ok(result.model_used)
            }
            Channel::WhatsApp => {
                let result = self.runner.run(&plan, &tools).await?;
                self.conversations
                    .add_assistant_message(
                        &job.conversation_id,
                        &result.text,
                        channel,
                        result.tool_calls_json(),
                    )
                    .await?;

                if result.text.trim().is_empty() {
                    warn!(job_id = %job.id, "empty reply, nothing to deliver");
                } else {
                    let outbound_id = self
                        .outbox
                        .enqueue_outbound(&NewOutbound {
                            channel,
                            account_id: self.account_id.clone(),
                            conversation_id: Some(job.conversation_id.clone()),
                            to: phone,
                            content: result.text.clone(),
                        })
                        .await?;
                    debug!(job_id = %job.id, outbound_id = %outbound_id, "reply queued");
                }
                Ok(result.model_used)
            }
        }
    }

    /// Runs a streaming turn while a forwarder patches the placeholder.
    async fn run_streaming(
        &self,
        plan: &TurnPlan,
        tools: &ToolRegistry,
        message_id: &MessageId,
    ) -> Result<TurnResult, CorvidError> {
        let (tx, rx) = mpsc::channel(64);
        let conversations = self.conversations.clone();
        let target = message_id.clone();
        let forwarder = tokio::spawn(forward_throttled(rx, self.stream_throttle, move |text| {
            let conversations = conversations.clone();
            let target = target.clone();
            async move { conversations.update_streaming_content(&target, &text).await }
        }));

        let result = self.runner.run_streaming(plan, tools, tx).await;
        match forwarder.await {
            Ok(updates) => debug!(message_id = %message_id, updates, "streaming finished"),
            Err(e) => debug!(message_id = %message_id, error = %e, "stream forwarder ended"),
        }
        result
    }
}

/// Whether a stored message belongs in the model context.
fn is_context_message(message: &StoredMessage) -> bool {
    !matches!(
        message.status,
        MessageStatus::Streaming | MessageStatus::Failed
    ) && !message.content.trim().is_empty()
}
