// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests across ingress, worker, approvals, delivery and the
//! task scheduler.
//!
//! Each test creates an isolated TestHarness with temp SQLite and mock
//! provider/session. Tests are independent and order-insensitive.

use std::sync::Arc;
use std::time::Duration;

use corvid_agent::{AgentWorker, JobRun, TaskScheduler, WorkerStores};
use corvid_context::SystemPrompt;
use corvid_core::types::{ApprovalStatus, JobStatus, MessageStatus, NewScheduledTask, Role};
use corvid_core::{
    ApprovalStore, Channel, ConversationStore, FailureReason, JobStore, LeaseStore,
};
use corvid_test_utils::TestHarness;
use corvid_whatsapp::{
    DeliveryLoop, InboundEvent, Ingress, IngressOutcome, LeaseManager, WhatsAppRuntime,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn worker(harness: &TestHarness) -> AgentWorker {
    AgentWorker::new(
        WorkerStores::from_backend(harness.storage.clone()),
        harness.mock_provider.clone(),
        SystemPrompt::from_text("You are Corvid."),
        &harness.config,
    )
    .unwrap()
}

fn delivery(harness: &TestHarness) -> DeliveryLoop {
    DeliveryLoop::new(
        harness.storage.clone(),
        harness.mock_session.clone(),
        &harness.config.whatsapp,
        "test-worker",
    )
    .with_sleeps(Duration::from_millis(5), Duration::from_millis(5))
}

fn inbound(phone: &str, text: &str) -> InboundEvent {
    InboundEvent {
        remote_jid: format!("{phone}@s.whatsapp.net"),
        from_me: false,
        text: Some(text.to_string()),
        push_name: Some("Ana".to_string()),
    }
}

async fn harness_allowing(phone: &str, responses: &[&str]) -> TestHarness {
    let phone = phone.to_string();
    TestHarness::builder()
        .with_mock_responses(responses.iter().copied())
        .with_config(move |c| c.whatsapp.allowed_senders = vec![phone])
        .build()
        .await
        .unwrap()
}

// ---- WhatsApp: inbound message to delivered reply ----

#[tokio::test]
async fn whatsapp_message_is_answered_and_delivered() {
    let harness = harness_allowing("15551234567", &["Hi Ana, how can I help?"]).await;
    let ingress = Ingress::new(harness.storage.clone(), &harness.config.whatsapp);

    let outcome = ingress
        .handle_inbound(inbound("15551234567", "hello"))
        .await
        .unwrap();
    let IngressOutcome::Queued {
        conversation_id,
        job_id,
        ..
    } = outcome
    else {
        panic!("expected queued, got {outcome:?}");
    };

    let processed = worker(&harness)
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(processed, 1);
    let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    delivery(&harness).deliver_next().await.unwrap().unwrap();
    let sent = harness.mock_session.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "15551234567");
    assert_eq!(sent[0].text, "Hi Ana, how can I help?");

    let context = harness
        .storage
        .get_conversation_context(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    let roles: Vec<_> = context.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(context.contact.unwrap().name, "Ana");
}

#[tokio::test]
async fn running_processes_cooperate_through_notify_and_lease() {
    let harness = harness_allowing("15551234567", &["pong"]).await;
    let cancel = CancellationToken::new();

    let worker = Arc::new(worker(&harness));
    let ingress = Arc::new(
        Ingress::new(harness.storage.clone(), &harness.config.whatsapp)
            .with_worker_notify(worker.notifier()),
    );
    let lease = LeaseManager::from_config(harness.storage.clone(), &harness.config.whatsapp);
    let runtime = WhatsAppRuntime::new(lease, &harness.config.whatsapp)
        .with_egress(delivery(&harness))
        .with_heartbeat_interval(Duration::from_millis(20));

    let worker_task = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };
    let runtime_task = tokio::spawn(runtime.run(cancel.clone()));

    ingress
        .handle_inbound(inbound("15551234567", "ping"))
        .await
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        harness.mock_session.wait_for_attempts(1),
    )
    .await
    .unwrap();

    cancel.cancel();
    worker_task.await.unwrap();
    runtime_task.await.unwrap().unwrap();

    assert_eq!(harness.mock_session.sent()[0].text, "pong");
    assert!(
        harness.storage.get_lease("default").await.unwrap().is_none(),
        "lease is released on shutdown"
    );
}

// ---- Approvals: a gated tool waits for the operator ----

#[tokio::test]
async fn approved_send_message_reaches_the_recipient() {
    let harness = TestHarness::new().await;
    harness.mock_provider.push_tool_use(
        "t1",
        "send_message",
        json!({"to": "15559998888", "text": "Dinner at 8?"}),
    );
    harness.mock_provider.push_text("Sent it to Bob.");
    let conversation = harness.web_conversation().await;
    let (_, job_id) = harness
        .submit(&conversation, "ask Bob about dinner", Channel::Web)
        .await;

    let storage = harness.storage.clone();
    let operator = tokio::spawn(async move {
        loop {
            if let Some(request) = storage.list_pending_approvals().await.unwrap().first() {
                assert_eq!(request.tool_name, "send_message");
                assert!(
                    storage
                        .resolve_approval(&request.id, ApprovalStatus::Approved)
                        .await
                        .unwrap()
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
    let run = worker(&harness).process_job(&job).await.unwrap();
    operator.await.unwrap();
    assert!(matches!(run, JobRun::Completed { .. }));

    delivery(&harness).deliver_next().await.unwrap().unwrap();
    let sent = harness.mock_session.sent();
    assert_eq!(sent[0].recipient, "15559998888");
    assert_eq!(sent[0].text, "Dinner at 8?");

    let context = harness
        .storage
        .get_conversation_context(&conversation)
        .await
        .unwrap()
        .unwrap();
    let reply = context.messages.last().unwrap();
    assert_eq!(reply.status, MessageStatus::Sent);
    assert_eq!(reply.content, "Sent it to Bob.");
}

#[tokio::test]
async fn unanswered_approval_expires_and_the_turn_continues() {
    let harness = TestHarness::builder()
        .with_config(|c| c.approval.timeout_secs = 0)
        .build()
        .await
        .unwrap();
    harness.mock_provider.push_tool_use(
        "t1",
        "send_message",
        json!({"to": "15559998888", "text": "hello"}),
    );
    harness.mock_provider.push_text("Nobody approved that.");
    let conversation = harness.web_conversation().await;
    let (_, job_id) = harness.submit(&conversation, "text Bob", Channel::Web).await;

    let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
    let run = worker(&harness).process_job(&job).await.unwrap();
    assert!(matches!(run, JobRun::Completed { .. }));

    assert!(harness.storage.list_pending_approvals().await.unwrap().is_empty());
    assert!(harness.mock_session.sent().is_empty());
}

// ---- Failures: retries until the attempt limit ----

#[tokio::test]
async fn transient_failures_exhaust_attempts() {
    let harness = TestHarness::new().await;
    harness
        .mock_provider
        .fail_model(&harness.config.anthropic.default_model);
    let conversation = harness.web_conversation().await;
    let (_, job_id) = harness.submit(&conversation, "hi", Channel::Web).await;
    let worker = worker(&harness);
    let cancel = CancellationToken::new();

    for _ in 0..harness.config.jobs.max_attempts {
        assert_eq!(worker.run_once(&cancel).await.unwrap(), 1);
    }
    assert_eq!(worker.run_once(&cancel).await.unwrap(), 0);

    let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, harness.config.jobs.max_attempts);
    assert_eq!(job.error_reason, Some(FailureReason::Transient));
}

// ---- Scheduled tasks: due task to answered turn ----

#[tokio::test]
async fn due_task_is_answered_in_its_conversation() {
    let harness = TestHarness::builder()
        .with_mock_responses(["Here is your morning digest."])
        .build()
        .await
        .unwrap();
    let worker = worker(&harness);
    let scheduler = TaskScheduler::new(harness.storage.clone(), &harness.config)
        .unwrap()
        .with_worker_notify(worker.notifier());

    scheduler
        .create_task(
            NewScheduledTask {
                name: "digest".into(),
                description: None,
                cron_expression: None,
                interval_ms: Some(86_400_000),
                payload: "Write the morning digest".into(),
                conversation_id: None,
                next_run_at: Some(1_000),
            },
            0,
        )
        .await
        .unwrap();

    let fired = scheduler.run_due(1_000).await.unwrap();
    assert_eq!(fired.len(), 1);
    let job = harness.storage.get_job(&fired[0].job_id).await.unwrap().unwrap();
    assert!(matches!(
        worker.process_job(&job).await.unwrap(),
        JobRun::Completed { .. }
    ));

    let request = &harness.mock_provider.requests()[0];
    let last = request.messages.last().unwrap();
    assert_eq!(last.role, Role::User);

    let context = harness
        .storage
        .get_conversation_context(&fired[0].conversation_id)
        .await
        .unwrap()
        .unwrap();
    let contents: Vec<_> = context.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "[Scheduled Task: digest] Write the morning digest",
            "Here is your morning digest."
        ]
    );
    assert_eq!(context.messages[1].status, MessageStatus::Sent);
}
