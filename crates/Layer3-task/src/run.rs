//! In-memory state of one task run
//!
//! Owned and mutated only by the task's orchestrator.

use crate::phase::Phase;
use conduit_foundation::{Error, Result, TaskId, TaskRecord};
use conduit_sandbox::{SandboxHandle, SandboxInstance};

#[derive(Debug)]
pub struct TaskRun {
    task_id: TaskId,
    instruction: Option<String>,
    requesting_user_id: Option<String>,
    phase: Phase,
    sandbox_handle: Option<SandboxHandle>,
    sandbox_port: Option<u16>,
    base_url: Option<String>,
    session_id: Option<String>,
    health_attempts_remaining: u32,
    has_been_running: bool,
}

impl TaskRun {
    pub fn new(task_id: TaskId, health_check_retries: u32) -> Self {
        Self {
            task_id,
            instruction: None,
            requesting_user_id: None,
            phase: Phase::Provisioning,
            sandbox_handle: None,
            sandbox_port: None,
            base_url: None,
            session_id: None,
            health_attempts_remaining: health_check_retries,
            has_been_running: false,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }

    pub fn requesting_user_id(&self) -> Option<&str> {
        self.requesting_user_id.as_deref()
    }

    pub fn sandbox_handle(&self) -> Option<&SandboxHandle> {
        self.sandbox_handle.as_ref()
    }

    pub fn sandbox_port(&self) -> Option<u16> {
        self.sandbox_port
    }

    /// `http://host:port` of the sandbox's service
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn health_attempts_remaining(&self) -> u32 {
        self.health_attempts_remaining
    }

    pub fn has_been_running(&self) -> bool {
        self.has_been_running
    }

    /// Copy instruction and user from the stored record (once)
    pub fn bind_record(&mut self, record: &TaskRecord) -> Result<()> {
        if self.instruction.is_some() {
            return Err(Error::Task(format!(
                "task {} already bound to its record",
                self.task_id
            )));
        }
        self.instruction = Some(record.instruction.clone());
        self.requesting_user_id = Some(record.requesting_user_id.clone());
        Ok(())
    }

    /// Record the provisioned sandbox (once per run)
    pub fn set_sandbox(&mut self, instance: &SandboxInstance) -> Result<()> {
        if self.sandbox_handle.is_some() {
            return Err(Error::Task(format!(
                "task {} already has a sandbox",
                self.task_id
            )));
        }
        self.sandbox_handle = Some(instance.handle.clone());
        self.sandbox_port = Some(instance.port);
        self.base_url = Some(instance.base_url());
        Ok(())
    }

    /// Record the session id (once per run)
    pub fn set_session(&mut self, session_id: impl Into<String>) -> Result<()> {
        if self.session_id.is_some() {
            return Err(Error::Task(format!(
                "task {} already has a session",
                self.task_id
            )));
        }
        self.session_id = Some(session_id.into());
        Ok(())
    }

    /// Move to `next`, refusing backward transitions
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(&next) {
            return Err(Error::Task(format!(
                "invalid transition {} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Consume one health probe from the budget; false when exhausted
    pub fn take_health_attempt(&mut self) -> bool {
        if self.health_attempts_remaining == 0 {
            return false;
        }
        self.health_attempts_remaining -= 1;
        true
    }

    pub fn mark_active(&mut self) {
        self.has_been_running = true;
    }

    /// Whether an event naming `session_id` concerns this run
    ///
    /// Events without a session id are taken as ours.
    pub fn owns_session(&self, session_id: Option<&str>) -> bool {
        match (session_id, self.session_id.as_deref()) {
            (None, _) => true,
            (Some(theirs), Some(ours)) => theirs == ours,
            (Some(_), None) => false,
        }
    }
}
