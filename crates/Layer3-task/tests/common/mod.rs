//! In-process fakes for the orchestrator's collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use conduit_foundation::{
    EventBus, InMemoryTaskStore, Result, StatusUpdate, TaskEvent, TaskId, TaskRecord, TaskStatus,
    TaskStore,
};
use conduit_sandbox::{SandboxError, SandboxHandle, SandboxInstance, SandboxProvider};
use conduit_session::{
    EventSink, EventSubscription, PermissionDecision, PromptOptions, PromptPart, RequestOptions,
    SessionClient, SessionError, SessionEvent, SessionInfo, SessionOptions, StreamMessage,
};
use conduit_task::{OrchestratorDeps, RunSettings};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub const SESSION_ID: &str = "ses_test";

// ============================================================================
// Sandbox
// ============================================================================

#[derive(Default)]
pub struct FakeSandbox {
    pub fail_start: bool,
    /// Held before answering a start, like a slow image pull
    pub start_delay: Option<Duration>,
    pub starts: AtomicUsize,
    pub stops: Mutex<Vec<SandboxHandle>>,
}

impl FakeSandbox {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            start_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self, _image: &str) -> std::result::Result<SandboxInstance, SandboxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            return Err(SandboxError::StartFailed("no runtime".into()));
        }
        Ok(SandboxInstance::new(
            SandboxHandle::new("sbx-1"),
            "127.0.0.1",
            4096,
        ))
    }

    async fn stop(&self, handle: &SandboxHandle) -> std::result::Result<(), SandboxError> {
        self.stops.lock().unwrap().push(handle.clone());
        Err(SandboxError::StopFailed("already gone".into()))
    }
}

// ============================================================================
// Session client
// ============================================================================

#[derive(Default)]
pub struct FakeSessions {
    /// Scripted health answers; once empty, `healthy` decides
    pub health_script: Mutex<VecDeque<bool>>,
    pub unhealthy: bool,
    pub fail_create: bool,
    pub fail_prompt: bool,
    pub fail_abort: bool,
    /// Delivered as soon as the stream is subscribed
    pub early_messages: Mutex<Vec<StreamMessage>>,

    pub health_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub prompt_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub replies: Mutex<Vec<(String, String, PermissionDecision)>>,
    /// `(call, directory)` for every call that takes request options
    pub directories: Mutex<Vec<(&'static str, Option<String>)>>,
    pub sink: Mutex<Option<EventSink>>,
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeSessions {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn with_health_script(script: &[bool]) -> Self {
        Self {
            health_script: Mutex::new(script.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn never_healthy() -> Self {
        Self {
            unhealthy: true,
            ..Default::default()
        }
    }

    pub fn health_count(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    pub fn replies(&self) -> Vec<(String, String, PermissionDecision)> {
        self.replies.lock().unwrap().clone()
    }

    /// Push a message through the captured event sink
    pub fn emit(&self, message: StreamMessage) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(message),
            None => false,
        }
    }

    pub fn emit_event(&self, event_type: &str, properties: Value) -> bool {
        self.emit(StreamMessage::Event(SessionEvent::new(event_type, properties)))
    }

    pub fn directories(&self) -> Vec<(&'static str, Option<String>)> {
        self.directories.lock().unwrap().clone()
    }

    fn note_directory(&self, call: &'static str, opts: &RequestOptions) {
        self.directories
            .lock()
            .unwrap()
            .push((call, opts.directory.clone()));
    }

    pub fn subscription_cancelled(&self) -> bool {
        let tokens = self.tokens.lock().unwrap();
        !tokens.is_empty() && tokens.iter().all(|t| t.is_cancelled())
    }
}

#[async_trait]
impl SessionClient for FakeSessions {
    async fn health(&self, _base_url: &str) -> std::result::Result<(), SessionError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.health_script.lock().unwrap().pop_front();
        match scripted.unwrap_or(!self.unhealthy) {
            true => Ok(()),
            false => Err(SessionError::Request("connection refused".into())),
        }
    }

    async fn create_session(
        &self,
        _base_url: &str,
        opts: &SessionOptions,
    ) -> std::result::Result<SessionInfo, SessionError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.note_directory("create", &opts.request);
        if self.fail_create {
            return Err(SessionError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(SessionInfo {
            id: SESSION_ID.to_string(),
            title: None,
        })
    }

    async fn subscribe_events(
        &self,
        _base_url: &str,
        opts: &RequestOptions,
        sink: EventSink,
    ) -> std::result::Result<EventSubscription, SessionError> {
        self.note_directory("subscribe", opts);
        for message in self.early_messages.lock().unwrap().drain(..) {
            sink.send(message);
        }
        *self.sink.lock().unwrap() = Some(sink);
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().push(token.clone());
        Ok(EventSubscription::detached(token))
    }

    async fn send_prompt_async(
        &self,
        _base_url: &str,
        _session_id: &str,
        _parts: &[PromptPart],
        opts: &PromptOptions,
    ) -> std::result::Result<(), SessionError> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);
        self.note_directory("prompt", &opts.request);
        if self.fail_prompt {
            return Err(SessionError::Status {
                status: 400,
                body: "bad prompt".into(),
            });
        }
        Ok(())
    }

    async fn reply_permission(
        &self,
        _base_url: &str,
        session_id: &str,
        permission_id: &str,
        decision: PermissionDecision,
        _opts: &RequestOptions,
    ) -> std::result::Result<(), SessionError> {
        self.replies.lock().unwrap().push((
            session_id.to_string(),
            permission_id.to_string(),
            decision,
        ));
        Ok(())
    }

    async fn abort_session(
        &self,
        _base_url: &str,
        _session_id: &str,
        opts: &RequestOptions,
    ) -> std::result::Result<(), SessionError> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.note_directory("abort", opts);
        if self.fail_abort {
            return Err(SessionError::Request("abort failed".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-memory store that records every update it receives
#[derive(Default)]
pub struct RecordingStore {
    pub inner: InMemoryTaskStore,
    pub updates: Mutex<Vec<StatusUpdate>>,
    /// Panic when asked to persist this status
    pub panic_on: Option<TaskStatus>,
}

impl RecordingStore {
    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.updates.lock().unwrap().iter().map(|u| u.status).collect()
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord> {
        self.inner.get_task(id).await
    }

    async fn insert_task(&self, record: TaskRecord) -> Result<()> {
        self.inner.insert_task(record).await
    }

    async fn update_task_status(&self, id: &TaskId, update: StatusUpdate) -> Result<TaskRecord> {
        if self.panic_on == Some(update.status) {
            panic!("store exploded persisting {}", update.status);
        }
        self.updates.lock().unwrap().push(update.clone());
        self.inner.update_task_status(id, update).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub task_id: TaskId,
    pub sandbox: Arc<FakeSandbox>,
    pub sessions: Arc<FakeSessions>,
    pub store: Arc<RecordingStore>,
    pub events: Arc<EventBus>,
}

impl Harness {
    pub async fn new(sandbox: FakeSandbox, sessions: FakeSessions) -> Self {
        Self::with_store(sandbox, sessions, RecordingStore::default()).await
    }

    pub async fn with_store(
        sandbox: FakeSandbox,
        sessions: FakeSessions,
        store: RecordingStore,
    ) -> Self {
        let record = TaskRecord::new("Add a regression test for the parser", "user-1");
        let task_id = record.id;
        store.inner.insert_task(record).await.unwrap();

        Self {
            task_id,
            sandbox: Arc::new(sandbox),
            sessions: Arc::new(sessions),
            store: Arc::new(store),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Harness whose task record was never stored
    pub fn without_record(sandbox: FakeSandbox, sessions: FakeSessions) -> Self {
        Self {
            task_id: TaskId::new(),
            sandbox: Arc::new(sandbox),
            sessions: Arc::new(sessions),
            store: Arc::new(RecordingStore::default()),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn deps(&self) -> OrchestratorDeps {
        OrchestratorDeps {
            sandbox: self.sandbox.clone(),
            sessions: self.sessions.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
        }
    }

    pub async fn record(&self) -> TaskRecord {
        self.store.inner.get_task(&self.task_id).await.unwrap()
    }

    /// Statuses published on the bus, in order
    pub async fn published_statuses(&self) -> Vec<TaskStatus> {
        self.events
            .history_for(self.task_id)
            .await
            .iter()
            .filter_map(TaskEvent::as_status)
            .collect()
    }

    pub async fn raw_event_types(&self) -> Vec<String> {
        self.events
            .history_for(self.task_id)
            .await
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Raw { event, .. } => event["type"].as_str().map(str::to_string),
                _ => None,
            })
            .collect()
    }
}

/// Fast timings; the deadline is far away unless a test shortens it
pub fn fast_settings() -> RunSettings {
    RunSettings::default()
        .with_health_check(5, Duration::from_millis(10))
        .with_task_timeout(Duration::from_secs(10))
}

/// Wait until `status` is published on the task's channel
pub async fn wait_for_status(rx: &mut broadcast::Receiver<TaskEvent>, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.as_status() == Some(status) => return,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("channel closed before {}", status)
                }
            }
        }
    })
    .await
    .expect("timed out waiting for status");
}

pub fn busy() -> Value {
    json!({"sessionID": SESSION_ID, "status": {"type": "busy"}})
}

pub fn idle() -> Value {
    json!({"sessionID": SESSION_ID, "status": {"type": "idle"}})
}
