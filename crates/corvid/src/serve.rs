// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `corvid serve` command implementation.
//!
//! Depending on `runtime.role`, starts the agent worker (with the task
//! scheduler and job retention sweep), the WhatsApp runtime (ingress, egress
//! or both), or everything in one process. All parts share one SQLite
//! database and stop together on SIGINT/SIGTERM.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use corvid_agent::shutdown;
use corvid_agent::{AgentWorker, RetentionSweeper, TaskScheduler, WorkerStores};
use corvid_anthropic::AnthropicProvider;
use corvid_config::model::CorvidConfig;
use corvid_context::SystemPrompt;
use corvid_core::{CorvidError, StorageAdapter};
use corvid_storage::SqliteStorage;
use corvid_whatsapp::{BridgeSession, DeliveryLoop, Ingress, LeaseManager, WhatsAppRuntime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time background tasks get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the `corvid serve` command until a shutdown signal arrives.
pub async fn run_serve(config: CorvidConfig) -> Result<(), CorvidError> {
    init_tracing(&config.agent.log_level);

    let role = config.runtime.role;
    info!(role = %role, agent = config.agent.name.as_str(), "starting corvid serve");

    let storage = {
        let storage = SqliteStorage::new(config.storage.clone());
        storage.initialize().await?;
        Arc::new(storage)
    };

    let cancel = shutdown::install_signal_handler();
    let failed = Arc::new(AtomicBool::new(false));
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let worker_notify = if role.runs_worker() {
        let worker = build_worker(&config, storage.clone()).await?;
        let notify = worker.notifier();
        let worker_cancel = cancel.clone();
        tasks.push((
            "agent-worker",
            tokio::spawn(async move { worker.run(worker_cancel).await }),
        ));
        spawn_housekeeping(&config, storage.clone(), notify.clone(), &cancel, &mut tasks)?;
        Some(notify)
    } else {
        info!("agent worker disabled for this role");
        None
    };

    if role.runs_ingress() || role.runs_egress() {
        let runtime = build_whatsapp_runtime(&config, storage.clone(), worker_notify)?;
        let runtime_cancel = cancel.clone();
        let failed = failed.clone();
        tasks.push((
            "whatsapp-runtime",
            tokio::spawn(async move {
                if let Err(e) = runtime.run(runtime_cancel.clone()).await {
                    error!(error = %e, "whatsapp runtime failed, shutting down");
                    failed.store(true, Ordering::SeqCst);
                    runtime_cancel.cancel();
                }
            }),
        ));
    } else {
        info!("whatsapp runtime disabled for this role");
    }

    cancel.cancelled().await;
    info!("shutdown requested");
    shutdown::drain_tasks(tasks, DRAIN_TIMEOUT).await;

    if let Err(e) = storage.close().await {
        warn!(error = %e, "failed to close storage cleanly");
    }
    info!("corvid stopped");

    if failed.load(Ordering::SeqCst) {
        return Err(CorvidError::Internal(
            "whatsapp runtime stopped with an error".to_string(),
        ));
    }
    Ok(())
}

async fn build_worker(
    config: &CorvidConfig,
    storage: Arc<SqliteStorage>,
) -> Result<AgentWorker, CorvidError> {
    let provider = AnthropicProvider::new(&config.anthropic).map_err(|e| {
        error!(error = %e, "failed to initialize Anthropic provider");
        e
    })?;
    let prompt = SystemPrompt::load(&config.agent).await;
    AgentWorker::new(
        WorkerStores::from_backend(storage),
        Arc::new(provider),
        prompt,
        config,
    )
}

/// Starts the task scheduler and the retention sweep when enabled.
fn spawn_housekeeping(
    config: &CorvidConfig,
    storage: Arc<SqliteStorage>,
    worker_notify: Arc<Notify>,
    cancel: &CancellationToken,
    tasks: &mut Vec<(&'static str, JoinHandle<()>)>,
) -> Result<(), CorvidError> {
    if config.scheduler.enabled {
        let scheduler =
            TaskScheduler::new(storage.clone(), config)?.with_worker_notify(worker_notify);
        let scheduler_cancel = cancel.clone();
        tasks.push((
            "task-scheduler",
            tokio::spawn(async move { scheduler.run(scheduler_cancel).await }),
        ));
    } else {
        info!("task scheduler disabled");
    }

    if config.retention.enabled {
        let sweeper = RetentionSweeper::new(storage, &config.retention);
        let sweeper_cancel = cancel.clone();
        tasks.push((
            "job-retention",
            tokio::spawn(async move { sweeper.run(sweeper_cancel).await }),
        ));
    } else {
        info!("job retention disabled");
    }
    Ok(())
}

fn build_whatsapp_runtime(
    config: &CorvidConfig,
    storage: Arc<SqliteStorage>,
    worker_notify: Option<Arc<Notify>>,
) -> Result<WhatsAppRuntime, CorvidError> {
    let whatsapp = &config.whatsapp;
    let role = config.runtime.role;
    let lease = LeaseManager::from_config(storage.clone(), whatsapp);
    let owner_id = lease.owner_id().to_string();
    let mut runtime = WhatsAppRuntime::new(lease, whatsapp);

    if role.runs_egress() {
        let session = Arc::new(BridgeSession::from_config(whatsapp)?);
        let delivery = DeliveryLoop::new(storage.clone(), session, whatsapp, owner_id.as_str());
        runtime = runtime.with_egress(delivery);
        info!(
            account_id = whatsapp.account_id.as_str(),
            owner_id = owner_id.as_str(),
            "whatsapp egress enabled"
        );
    }

    if role.runs_ingress() {
        let mut ingress = Ingress::new(storage, whatsapp);
        if let Some(notify) = worker_notify {
            ingress = ingress.with_worker_notify(notify);
        }
        runtime = runtime.with_ingress(
            Arc::new(ingress),
            whatsapp.ingress_bind.clone(),
            whatsapp.bridge_token.clone(),
        );
        info!(bind = whatsapp.ingress_bind.as_str(), "whatsapp ingress enabled");
    }

    Ok(runtime)
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("corvid={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
