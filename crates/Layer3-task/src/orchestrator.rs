//! Task Orchestrator - one actor per task
//!
//! The orchestrator owns a `TaskRun` and a mailbox. It handles one
//! `Command` at a time; collaborator calls are awaited inline, while the
//! event stream, the deadline and health retries are separate tokio tasks
//! that only ever post back into the mailbox.
//!
//! Startup calls (sandbox start, health probe, session creation,
//! subscription, prompt) are cut off at the task deadline, since the
//! `DeadlineElapsed` message cannot be handled while one is in flight.
//!
//! Every terminal transition goes through [`TaskOrchestrator::finish`],
//! which runs exactly once per task:
//!
//! 1. record the terminal phase (all later messages are dropped)
//! 2. abort the deadline and any pending health retry
//! 3. cancel the event stream subscription
//! 4. persist the final status (a missing record is logged, not raised)
//! 5. publish `StatusChanged`
//! 6. release the sandbox lease
//! 7. close the task's event channel

use crate::classify::{classify, EventClass};
use crate::message::Command;
use crate::phase::Phase;
use crate::run::TaskRun;
use crate::settings::RunSettings;
use conduit_foundation::{EventBus, StatusUpdate, TaskEvent, TaskId, TaskStatus, TaskStore};
use conduit_sandbox::{SandboxLease, SandboxProvider};
use conduit_session::{
    EventSink, EventSubscription, PermissionDecision, SessionClient, SessionEvent, StreamMessage,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

const DEADLINE_REASON: &str = "task timed out";

/// Await `fut`, giving up at `deadline`
async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// External collaborators injected into every orchestrator
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub sandbox: Arc<dyn SandboxProvider>,
    pub sessions: Arc<dyn SessionClient>,
    pub store: Arc<dyn TaskStore>,
    pub events: Arc<EventBus>,
}

// ============================================================================
// Handle
// ============================================================================

/// Control surface for a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    task_id: TaskId,
    tx: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<Phase>,
}

impl OrchestratorHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Request cancellation. Returns false if the orchestrator already exited.
    pub fn cancel(&self) -> bool {
        self.tx.send(Command::Cancel).is_ok()
    }

    /// Latest phase
    pub fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait for the terminal phase
    ///
    /// If the worker died without reaching one, the last phase it reported
    /// is returned.
    pub async fn wait(&self) -> Phase {
        let mut rx = self.phase.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

impl std::fmt::Debug for OrchestratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorHandle")
            .field("task_id", &self.task_id)
            .field("phase", &*self.phase.borrow())
            .finish()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct TaskOrchestrator {
    run: TaskRun,
    deps: OrchestratorDeps,
    settings: RunSettings,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    phase_tx: watch::Sender<Phase>,
    lease: Option<SandboxLease>,
    subscription: Option<EventSubscription>,
    deadline: Option<JoinHandle<()>>,
    deadline_at: Option<Instant>,
    health_retry: Option<JoinHandle<()>>,
    /// Stream events received before `Running`, replayed on entry
    pending_events: VecDeque<SessionEvent>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with `Start` already queued
    pub fn new(
        task_id: TaskId,
        deps: OrchestratorDeps,
        settings: RunSettings,
    ) -> (Self, OrchestratorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Provisioning);
        // Receiver is owned below, so this cannot fail
        let _ = tx.send(Command::Start);

        let handle = OrchestratorHandle {
            task_id,
            tx: tx.clone(),
            phase: phase_rx,
        };
        let orchestrator = Self {
            run: TaskRun::new(task_id, settings.health_check_retries),
            deps,
            settings,
            tx,
            rx,
            phase_tx,
            lease: None,
            subscription: None,
            deadline: None,
            deadline_at: None,
            health_retry: None,
            pending_events: VecDeque::new(),
        };
        (orchestrator, handle)
    }

    /// Spawn the orchestrator on the current runtime
    pub fn spawn(
        task_id: TaskId,
        deps: OrchestratorDeps,
        settings: RunSettings,
    ) -> (OrchestratorHandle, JoinHandle<Phase>) {
        let (orchestrator, handle) = Self::new(task_id, deps, settings);
        (handle, tokio::spawn(orchestrator.run()))
    }

    /// Message loop; returns the terminal phase
    pub async fn run(mut self) -> Phase {
        let task_id = self.run.task_id();
        info!(task_id = %task_id, "Orchestrator started");
        self.arm_deadline();

        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
            if self.run.phase().is_terminal() {
                break;
            }
        }

        let phase = self.run.phase().clone();
        info!(task_id = %task_id, phase = %phase, "Orchestrator stopped");
        phase
    }

    async fn handle(&mut self, command: Command) {
        if self.run.phase().is_terminal() {
            trace!(task_id = %self.run.task_id(), command = command.name(), "Dropping message after terminal phase");
            return;
        }
        trace!(task_id = %self.run.task_id(), command = command.name(), phase = %self.run.phase(), "Handling message");

        match command {
            Command::Start => self.start().await,
            Command::ProbeHealth => self.probe_health().await,
            Command::CreateSession => self.create_session().await,
            Command::SendPrompt => self.send_prompt().await,
            Command::Cancel => self.cancel().await,
            Command::DeadlineElapsed => self.fail(DEADLINE_REASON).await,
            Command::Stream(message) => self.on_stream(message).await,
        }
    }

    // ========================================================================
    // Lifecycle steps
    // ========================================================================

    async fn start(&mut self) {
        if *self.run.phase() != Phase::Provisioning {
            return;
        }
        let task_id = self.run.task_id();

        let record = match self.deps.store.get_task(&task_id).await {
            Ok(record) => record,
            Err(e) => {
                self.fail(format!("task record unavailable: {}", e)).await;
                return;
            }
        };
        if let Err(e) = self.run.bind_record(&record) {
            self.fail(e.to_string()).await;
            return;
        }

        info!(task_id = %task_id, image = %self.settings.image, "Provisioning sandbox");
        let started = until(
            self.deadline_at,
            self.deps.sandbox.start(&self.settings.image),
        )
        .await;
        let instance = match started {
            Some(Ok(instance)) => instance,
            None => {
                self.fail(DEADLINE_REASON).await;
                return;
            }
            Some(Err(e)) => {
                self.fail(format!("sandbox provisioning failed: {}", e)).await;
                return;
            }
        };

        let lease = SandboxLease::new(Arc::clone(&self.deps.sandbox), instance.clone());
        self.lease = Some(lease);
        if let Err(e) = self.run.set_sandbox(&instance) {
            self.fail(e.to_string()).await;
            return;
        }
        info!(task_id = %task_id, sandbox = %instance.handle, port = instance.port, "Sandbox started");

        self.persist(StatusUpdate::new(TaskStatus::Starting).with_sandbox(instance.handle.as_str()))
            .await;
        self.publish_status(TaskStatus::Starting).await;
        self.transition(Phase::HealthCheck);
        self.enqueue(Command::ProbeHealth);
    }

    async fn probe_health(&mut self) {
        if *self.run.phase() != Phase::HealthCheck {
            return;
        }
        self.health_retry = None;

        if !self.run.take_health_attempt() {
            self.fail("health check timed out").await;
            return;
        }
        let Some(base_url) = self.run.base_url().map(str::to_string) else {
            self.fail("no sandbox to probe").await;
            return;
        };

        match until(self.deadline_at, self.deps.sessions.health(&base_url)).await {
            None => self.fail(DEADLINE_REASON).await,
            Some(Ok(())) => {
                debug!(task_id = %self.run.task_id(), "Sandbox healthy");
                self.transition(Phase::CreatingSession);
                self.enqueue(Command::CreateSession);
            }
            Some(Err(e)) => {
                debug!(
                    task_id = %self.run.task_id(),
                    remaining = self.run.health_attempts_remaining(),
                    "Health probe failed: {}", e
                );
                self.schedule_health_retry(self.settings.health_check_interval);
            }
        }
    }

    async fn create_session(&mut self) {
        if *self.run.phase() != Phase::CreatingSession {
            return;
        }
        let (Some(base_url), Some(instruction)) = (
            self.run.base_url().map(str::to_string),
            self.run.instruction().map(str::to_string),
        ) else {
            self.fail("session requested before sandbox was ready").await;
            return;
        };

        let opts = self.settings.session_options(&instruction);
        let created = until(
            self.deadline_at,
            self.deps.sessions.create_session(&base_url, &opts),
        )
        .await;
        let info = match created {
            Some(Ok(info)) => info,
            None => {
                self.fail(DEADLINE_REASON).await;
                return;
            }
            Some(Err(e)) => {
                self.fail(format!("session creation failed: {}", e)).await;
                return;
            }
        };
        if let Err(e) = self.run.set_session(info.id.as_str()) {
            self.fail(e.to_string()).await;
            return;
        }
        info!(task_id = %self.run.task_id(), session_id = %info.id, "Session created");

        let sink = EventSink::from_sender(self.tx.clone(), Command::Stream);
        let request = self.settings.request_options();
        let subscribed = until(
            self.deadline_at,
            self.deps.sessions.subscribe_events(&base_url, &request, sink),
        )
        .await;
        match subscribed {
            Some(Ok(subscription)) => self.subscription = Some(subscription),
            None => {
                self.fail(DEADLINE_REASON).await;
                return;
            }
            Some(Err(e)) => {
                self.fail(format!("event subscription failed: {}", e)).await;
                return;
            }
        }

        self.transition(Phase::Prompting);
        self.enqueue(Command::SendPrompt);
    }

    async fn send_prompt(&mut self) {
        if *self.run.phase() != Phase::Prompting {
            return;
        }
        let (Some(base_url), Some(session_id), Some(instruction)) = (
            self.run.base_url().map(str::to_string),
            self.run.session_id().map(str::to_string),
            self.run.instruction().map(str::to_string),
        ) else {
            self.fail("prompt requested before session was ready").await;
            return;
        };

        let parts = self.settings.prompt_parts(&instruction);
        let opts = self.settings.prompt_options();
        let sent = until(
            self.deadline_at,
            self.deps
                .sessions
                .send_prompt_async(&base_url, &session_id, &parts, &opts),
        )
        .await;
        match sent {
            Some(Ok(())) => {}
            None => {
                self.fail(DEADLINE_REASON).await;
                return;
            }
            Some(Err(e)) => {
                self.fail(format!("prompt submission failed: {}", e)).await;
                return;
            }
        }

        self.persist(
            StatusUpdate::new(TaskStatus::Running)
                .with_session(session_id.as_str())
                .started_now(),
        )
        .await;
        self.publish_status(TaskStatus::Running).await;
        self.transition(Phase::Running);
        info!(task_id = %self.run.task_id(), "Task running");

        while let Some(event) = self.pending_events.pop_front() {
            self.on_event(event).await;
            if self.run.phase().is_terminal() {
                break;
            }
        }
    }

    async fn cancel(&mut self) {
        info!(task_id = %self.run.task_id(), phase = %self.run.phase(), "Cancel requested");
        if let (Some(base_url), Some(session_id)) = (self.run.base_url(), self.run.session_id()) {
            let opts = self.settings.request_options();
            if let Err(e) = self
                .deps
                .sessions
                .abort_session(base_url, session_id, &opts)
                .await
            {
                warn!(task_id = %self.run.task_id(), "Ignoring session abort failure: {}", e);
            }
        }
        self.finish(Phase::Cancelled).await;
    }

    // ========================================================================
    // Stream handling
    // ========================================================================

    async fn on_stream(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Event(event) => {
                self.deps
                    .events
                    .publish(TaskEvent::raw(self.run.task_id(), event.to_value()))
                    .await;

                if self.run.phase().is_running() {
                    self.on_event(event).await;
                } else {
                    trace!(task_id = %self.run.task_id(), event_type = %event.event_type, "Queueing early event");
                    self.pending_events.push_back(event);
                }
            }
            StreamMessage::TransportError(reason) => {
                self.fail(format!("event stream error: {}", reason)).await
            }
            StreamMessage::Disconnected(reason) => {
                self.fail(format!("event stream disconnected: {}", reason))
                    .await
            }
        }
    }

    /// Apply one classified event while running
    async fn on_event(&mut self, event: SessionEvent) {
        let task_id = self.run.task_id();
        match classify(&event) {
            EventClass::Active { session_id } => {
                if self.run.owns_session(session_id.as_deref()) {
                    self.run.mark_active();
                }
            }
            EventClass::Idle { session_id } => {
                if !self.run.owns_session(session_id.as_deref()) {
                    return;
                }
                if self.run.has_been_running() {
                    self.finish(Phase::Completed).await;
                } else {
                    debug!(task_id = %task_id, "Ignoring idle before any activity");
                }
            }
            EventClass::Error {
                session_id,
                message,
            } => {
                if self.run.owns_session(session_id.as_deref()) {
                    self.fail(message).await;
                }
            }
            EventClass::PermissionRequest {
                permission_id,
                session_id,
            } => self.approve_permission(&session_id, &permission_id).await,
            EventClass::Passthrough => {
                trace!(task_id = %task_id, event_type = %event.event_type, "Passthrough event");
            }
        }
    }

    async fn approve_permission(&self, session_id: &str, permission_id: &str) {
        let Some(base_url) = self.run.base_url() else {
            return;
        };
        debug!(task_id = %self.run.task_id(), permission_id, "Auto-approving permission");
        if let Err(e) = self
            .deps
            .sessions
            .reply_permission(
                base_url,
                session_id,
                permission_id,
                PermissionDecision::Always,
                &self.settings.request_options(),
            )
            .await
        {
            warn!(task_id = %self.run.task_id(), permission_id, "Permission reply failed: {}", e);
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn arm_deadline(&mut self) {
        let tx = self.tx.clone();
        let at = Instant::now() + self.settings.task_timeout;
        self.deadline_at = Some(at);
        self.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = tx.send(Command::DeadlineElapsed);
        }));
    }

    fn schedule_health_retry(&mut self, delay: Duration) {
        let tx = self.tx.clone();
        self.health_retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::ProbeHealth);
        }));
    }

    fn abort_timers(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        if let Some(retry) = self.health_retry.take() {
            retry.abort();
        }
    }

    // ========================================================================
    // Transitions and side effects
    // ========================================================================

    fn enqueue(&self, command: Command) {
        // Receiver lives in self
        let _ = self.tx.send(command);
    }

    fn transition(&mut self, next: Phase) {
        let task_id = self.run.task_id();
        let from = self.run.phase().clone();
        if let Err(e) = self.run.advance(next) {
            warn!(task_id = %task_id, "{}", e);
            return;
        }
        if from != *self.run.phase() {
            info!(task_id = %task_id, from = %from, to = %self.run.phase(), "Phase changed");
        }
        self.phase_tx.send_replace(self.run.phase().clone());
    }

    async fn fail(&mut self, reason: impl Into<String>) {
        self.finish(Phase::Failed(reason.into())).await;
    }

    /// Terminal transition; see module docs for the sequence
    async fn finish(&mut self, terminal: Phase) {
        if self.run.phase().is_terminal() {
            return;
        }
        let task_id = self.run.task_id();
        match &terminal {
            Phase::Failed(reason) => warn!(task_id = %task_id, phase = %self.run.phase(), "Task failed: {}", reason),
            other => info!(task_id = %task_id, "Task {}", other),
        }

        let from = self.run.phase().clone();
        if let Err(e) = self.run.advance(terminal) {
            warn!(task_id = %task_id, "{}", e);
            return;
        }
        debug!(task_id = %task_id, from = %from, to = %self.run.phase(), "Phase changed");

        self.abort_timers();
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.pending_events.clear();

        let phase = self.run.phase().clone();
        let status = phase.status();
        let update = match &phase {
            Phase::Failed(reason) => StatusUpdate::new(status).with_error(reason.as_str()),
            _ => StatusUpdate::new(status).completed_now(),
        };
        self.persist(update).await;
        self.publish_status(status).await;

        if let Some(mut lease) = self.lease.take() {
            lease.release().await;
        }
        self.deps.events.close_task(task_id).await;

        self.phase_tx.send_replace(phase);
    }

    async fn persist(&self, update: StatusUpdate) {
        let task_id = self.run.task_id();
        let status = update.status;
        match self.deps.store.update_task_status(&task_id, update).await {
            Ok(_) => debug!(task_id = %task_id, status = %status, "Status persisted"),
            Err(e) if e.is_not_found() => {
                warn!(task_id = %task_id, status = %status, "Task record missing, status not persisted")
            }
            Err(e) => warn!(task_id = %task_id, status = %status, "Failed to persist status: {}", e),
        }
    }

    async fn publish_status(&self, status: TaskStatus) {
        self.deps
            .events
            .publish(TaskEvent::status(self.run.task_id(), status))
            .await;
    }
}
