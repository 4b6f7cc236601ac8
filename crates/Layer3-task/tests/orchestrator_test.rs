//! Orchestrator lifecycle tests against in-process fakes

mod common;

use common::*;
use conduit_foundation::TaskStatus;
use conduit_session::{PermissionDecision, StreamMessage};
use conduit_task::{Phase, TaskOrchestrator};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

async fn wait_phase(handle: &conduit_task::OrchestratorHandle) -> Phase {
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("orchestrator did not finish")
}

/// Spawn and wait until the task reports running
async fn start_running(h: &Harness) -> conduit_task::OrchestratorHandle {
    let mut rx = h.events.subscribe(h.task_id).await;
    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    wait_for_status(&mut rx, TaskStatus::Running).await;
    handle
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_busy_then_idle_completes() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    assert!(h.sessions.emit_event("session.status", busy()));
    assert!(h.sessions.emit_event("message.part.updated", json!({"part": {"text": "..."}})));
    assert!(h.sessions.emit_event("session.status", idle()));

    assert_eq!(wait_phase(&handle).await, Phase::Completed);

    let record = h.record().await;
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.sandbox_id.as_deref(), Some("sbx-1"));
    assert_eq!(record.session_id.as_deref(), Some(SESSION_ID));
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());
    assert!(record.error.is_none());

    assert_eq!(
        h.published_statuses().await,
        vec![TaskStatus::Starting, TaskStatus::Running, TaskStatus::Completed]
    );
    assert_eq!(
        h.raw_event_types().await,
        vec!["session.status", "message.part.updated", "session.status"]
    );
    assert_eq!(h.sandbox.stop_count(), 1);
    assert!(h.sessions.subscription_cancelled());
}

#[tokio::test]
async fn test_session_idle_event_also_completes() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event("session.status", busy());
    h.sessions
        .emit_event("session.idle", json!({"sessionID": SESSION_ID}));

    assert_eq!(wait_phase(&handle).await, Phase::Completed);
}

#[tokio::test]
async fn test_idle_before_busy_keeps_running() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event("session.status", idle());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.phase(), Phase::Running);

    // Once busy has been seen, idle completes
    h.sessions.emit_event("session.status", busy());
    h.sessions.emit_event("session.status", idle());
    assert_eq!(wait_phase(&handle).await, Phase::Completed);
}

#[tokio::test]
async fn test_other_session_events_drive_nothing() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event(
        "session.status",
        json!({"sessionID": "someone-else", "status": {"type": "busy"}}),
    );
    h.sessions.emit_event(
        "session.error",
        json!({"sessionID": "someone-else", "error": {"name": "Boom"}}),
    );
    h.sessions.emit_event("session.status", idle());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.phase(), Phase::Running);
    assert_eq!(h.raw_event_types().await.len(), 3);

    assert!(handle.cancel());
    assert_eq!(wait_phase(&handle).await, Phase::Cancelled);
}

#[tokio::test]
async fn test_events_before_running_are_replayed() {
    let sessions = FakeSessions::healthy();
    sessions.early_messages.lock().unwrap().extend([
        StreamMessage::Event(conduit_session::SessionEvent::new("session.status", busy())),
        StreamMessage::Event(conduit_session::SessionEvent::new("session.status", idle())),
    ]);
    let h = Harness::new(FakeSandbox::default(), sessions).await;

    let (handle, join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    assert_eq!(wait_phase(&handle).await, Phase::Completed);
    assert_eq!(join.await.unwrap(), Phase::Completed);

    // Running was still persisted before completion
    assert_eq!(
        h.store.statuses(),
        vec![TaskStatus::Starting, TaskStatus::Running, TaskStatus::Completed]
    );
    assert_eq!(h.raw_event_types().await.len(), 2);
}

// ============================================================================
// Health checks
// ============================================================================

#[tokio::test]
async fn test_health_budget_bounds_probes() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::never_healthy()).await;
    let settings = fast_settings().with_health_check(3, Duration::from_millis(10));

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    assert_eq!(
        wait_phase(&handle).await,
        Phase::Failed("health check timed out".into())
    );

    assert_eq!(h.sessions.health_count(), 3);
    assert_eq!(h.sessions.create_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.sandbox.stop_count(), 1);

    let record = h.record().await;
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("health check timed out"));
    assert!(record.completed_at.is_none());
    assert_eq!(
        h.published_statuses().await,
        vec![TaskStatus::Starting, TaskStatus::Failed]
    );
}

#[tokio::test]
async fn test_health_two_failures_then_success() {
    let h = Harness::new(
        FakeSandbox::default(),
        FakeSessions::with_health_script(&[false, false, true]),
    )
    .await;
    let settings = fast_settings().with_health_check(3, Duration::from_millis(10));

    let mut rx = h.events.subscribe(h.task_id).await;
    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    wait_for_status(&mut rx, TaskStatus::Running).await;

    assert_eq!(h.sessions.health_count(), 3);
    assert_eq!(h.sessions.create_calls.load(Ordering::SeqCst), 1);

    handle.cancel();
    wait_phase(&handle).await;
}

#[tokio::test]
async fn test_cancel_during_health_retries() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::never_healthy()).await;
    let settings = fast_settings().with_health_check(1000, Duration::from_millis(20));

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(handle.phase(), Phase::HealthCheck);

    assert!(handle.cancel());
    assert_eq!(wait_phase(&handle).await, Phase::Cancelled);

    // No session yet, so nothing to abort
    assert_eq!(h.sessions.abort_count(), 0);
    let probes = h.sessions.health_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.sessions.health_count(), probes);
    assert_eq!(h.sandbox.stop_count(), 1);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_provisioning_failure_skips_stop() {
    let h = Harness::new(FakeSandbox::failing(), FakeSessions::healthy()).await;

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    let phase = wait_phase(&handle).await;
    assert!(matches!(&phase, Phase::Failed(reason) if reason.starts_with("sandbox provisioning failed")));

    assert_eq!(h.sandbox.start_count(), 1);
    assert_eq!(h.sandbox.stop_count(), 0);
    assert_eq!(h.sessions.health_count(), 0);
    assert_eq!(h.store.statuses(), vec![TaskStatus::Failed]);
    assert_eq!(h.published_statuses().await, vec![TaskStatus::Failed]);
}

#[tokio::test]
async fn test_missing_record_fails_without_provisioning() {
    let h = Harness::without_record(FakeSandbox::default(), FakeSessions::healthy());

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    let phase = wait_phase(&handle).await;
    assert!(matches!(&phase, Phase::Failed(reason) if reason.starts_with("task record unavailable")));
    assert_eq!(h.sandbox.start_count(), 0);
    assert_eq!(h.sandbox.stop_count(), 0);
}

#[tokio::test]
async fn test_session_creation_failure() {
    let sessions = FakeSessions {
        fail_create: true,
        ..Default::default()
    };
    let h = Harness::new(FakeSandbox::default(), sessions).await;

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    let phase = wait_phase(&handle).await;
    assert!(matches!(&phase, Phase::Failed(reason) if reason.starts_with("session creation failed")));
    assert_eq!(h.sessions.prompt_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.sandbox.stop_count(), 1);
}

#[tokio::test]
async fn test_prompt_failure() {
    let sessions = FakeSessions {
        fail_prompt: true,
        ..Default::default()
    };
    let h = Harness::new(FakeSandbox::default(), sessions).await;

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    let phase = wait_phase(&handle).await;
    assert!(matches!(&phase, Phase::Failed(reason) if reason.starts_with("prompt submission failed")));
    assert_eq!(h.sandbox.stop_count(), 1);
    assert!(h.sessions.subscription_cancelled());
    assert_eq!(
        h.store.statuses(),
        vec![TaskStatus::Starting, TaskStatus::Failed]
    );
}

#[tokio::test]
async fn test_session_error_event_fails_with_message() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event(
        "session.error",
        json!({
            "sessionID": SESSION_ID,
            "error": {"name": "APIError", "data": {"message": "model overloaded"}}
        }),
    );

    assert_eq!(
        wait_phase(&handle).await,
        Phase::Failed("model overloaded".into())
    );
    assert_eq!(h.record().await.error.as_deref(), Some("model overloaded"));
}

#[tokio::test]
async fn test_status_error_without_message_uses_fallback() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event(
        "session.status",
        json!({"sessionID": SESSION_ID, "status": {"type": "error"}}),
    );
    assert_eq!(wait_phase(&handle).await, Phase::Failed("session error".into()));
}

#[tokio::test]
async fn test_stream_transport_error_fails() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions
        .emit(StreamMessage::TransportError("connection reset".into()));
    assert_eq!(
        wait_phase(&handle).await,
        Phase::Failed("event stream error: connection reset".into())
    );
    assert_eq!(h.sandbox.stop_count(), 1);
}

#[tokio::test]
async fn test_stream_disconnect_fails() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions
        .emit(StreamMessage::Disconnected("stream ended".into()));
    assert_eq!(
        wait_phase(&handle).await,
        Phase::Failed("event stream disconnected: stream ended".into())
    );
}

#[tokio::test]
async fn test_record_deleted_mid_run_is_tolerated() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.store.inner.remove(&h.task_id).await;
    h.sessions.emit_event("session.status", busy());
    h.sessions.emit_event("session.status", idle());

    assert_eq!(wait_phase(&handle).await, Phase::Completed);
    assert_eq!(h.sandbox.stop_count(), 1);
    assert_eq!(
        h.published_statuses().await,
        vec![TaskStatus::Starting, TaskStatus::Running, TaskStatus::Completed]
    );
}

#[tokio::test]
async fn test_directory_sent_with_every_session_call() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let mut settings = fast_settings();
    settings.session.directory = Some("/workspace/repo".to_string());

    let mut rx = h.events.subscribe(h.task_id).await;
    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    wait_for_status(&mut rx, TaskStatus::Running).await;
    assert!(handle.cancel());
    assert_eq!(wait_phase(&handle).await, Phase::Cancelled);

    let dir = Some("/workspace/repo".to_string());
    assert_eq!(
        h.sessions.directories(),
        vec![
            ("create", dir.clone()),
            ("subscribe", dir.clone()),
            ("prompt", dir.clone()),
            ("abort", dir),
        ]
    );
}

// ============================================================================
// Cancel and deadline
// ============================================================================

#[tokio::test]
async fn test_cancel_aborts_session_even_if_abort_errors() {
    let sessions = FakeSessions {
        fail_abort: true,
        ..Default::default()
    };
    let h = Harness::new(FakeSandbox::default(), sessions).await;
    let handle = start_running(&h).await;

    assert!(handle.cancel());
    assert_eq!(wait_phase(&handle).await, Phase::Cancelled);

    assert_eq!(h.sessions.abort_count(), 1);
    let record = h.record().await;
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert!(record.completed_at.is_some());
    assert_eq!(h.sandbox.stop_count(), 1);

    // Orchestrator is gone; further cancels are refused
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.cancel());
}

#[tokio::test]
async fn test_deadline_fails_task_once() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let settings = fast_settings().with_task_timeout(Duration::from_millis(200));

    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    assert_eq!(
        wait_phase(&handle).await,
        Phase::Failed("task timed out".into())
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    let terminal: Vec<_> = h
        .store
        .statuses()
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
    assert_eq!(terminal, vec![TaskStatus::Failed]);
    assert_eq!(h.sandbox.stop_count(), 1);
}

#[tokio::test]
async fn test_deadline_cancelled_by_completion() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let settings = fast_settings().with_task_timeout(Duration::from_millis(300));

    let mut rx = h.events.subscribe(h.task_id).await;
    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    wait_for_status(&mut rx, TaskStatus::Running).await;
    h.sessions.emit_event("session.status", busy());
    h.sessions.emit_event("session.status", idle());
    assert_eq!(wait_phase(&handle).await, Phase::Completed);

    // Past the deadline: nothing else is persisted or published
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        h.store.statuses(),
        vec![TaskStatus::Starting, TaskStatus::Running, TaskStatus::Completed]
    );
    assert_eq!(h.record().await.status, TaskStatus::Completed);
    assert_eq!(h.sandbox.stop_count(), 1);
}

#[tokio::test]
async fn test_deadline_cuts_off_slow_provisioning() {
    let sandbox = FakeSandbox::slow(Duration::from_secs(5));
    let h = Harness::new(sandbox, FakeSessions::healthy()).await;
    let settings = fast_settings().with_task_timeout(Duration::from_millis(100));

    let started = std::time::Instant::now();
    let (handle, _join) = TaskOrchestrator::spawn(h.task_id, h.deps(), settings);
    assert_eq!(
        wait_phase(&handle).await,
        Phase::Failed("task timed out".into())
    );
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(h.sandbox.start_count(), 1);
    assert_eq!(h.sandbox.stop_count(), 0);
    assert_eq!(h.store.statuses(), vec![TaskStatus::Failed]);
}

#[tokio::test]
async fn test_late_messages_are_dropped() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event("session.status", busy());
    h.sessions.emit_event("session.status", idle());
    // Queued behind the completion
    h.sessions.emit(StreamMessage::TransportError("late".into()));
    handle.cancel();

    assert_eq!(wait_phase(&handle).await, Phase::Completed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.sessions.abort_count(), 0);
    assert_eq!(h.record().await.status, TaskStatus::Completed);
    assert_eq!(h.sandbox.stop_count(), 1);
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_permission_request_auto_approved_once() {
    let h = Harness::new(FakeSandbox::default(), FakeSessions::healthy()).await;
    let handle = start_running(&h).await;

    h.sessions.emit_event(
        "permission.updated",
        json!({"id": "per_1", "sessionID": SESSION_ID, "type": "bash"}),
    );
    h.sessions
        .emit_event("permission.updated", json!({"sessionID": SESSION_ID}));
    h.sessions
        .emit_event("permission.asked", json!({"id": "per_2"}));
    h.sessions.emit_event("session.status", busy());
    h.sessions.emit_event("session.status", idle());

    assert_eq!(wait_phase(&handle).await, Phase::Completed);
    assert_eq!(
        h.sessions.replies(),
        vec![(
            SESSION_ID.to_string(),
            "per_1".to_string(),
            PermissionDecision::Always
        )]
    );
}

// ============================================================================
// Abnormal termination
// ============================================================================

#[tokio::test]
async fn test_panicking_worker_still_stops_sandbox() {
    let store = RecordingStore {
        panic_on: Some(TaskStatus::Starting),
        ..Default::default()
    };
    let h = Harness::with_store(FakeSandbox::default(), FakeSessions::healthy(), store).await;

    let (handle, join) = TaskOrchestrator::spawn(h.task_id, h.deps(), fast_settings());
    assert!(join.await.unwrap_err().is_panic());

    // Worker died before reaching a terminal phase
    assert!(!handle.wait().await.is_terminal());

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.sandbox.stop_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sandbox was not stopped");
    assert_eq!(h.sandbox.stop_count(), 1);
}
